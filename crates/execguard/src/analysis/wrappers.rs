//! Wrapper commands recognized at the head of a segment.
//!
//! Every wrapper decision is made from this table. A wrapper that is not
//! listed is an ordinary executable. Unwrapping is purely syntactic and goes
//! one level deep.

use crate::model::{WrapperDisposition, WrapperUse};

#[derive(Clone, Copy, Debug)]
struct WrapperRule {
    name: &'static str,
    /// Semantic wrappers change what the wrapped command does.
    semantic: bool,
}

const WRAPPERS: &[WrapperRule] = &[
    WrapperRule { name: "env", semantic: false },
    WrapperRule { name: "nohup", semantic: false },
    WrapperRule { name: "command", semantic: false },
    WrapperRule { name: "sudo", semantic: true },
    WrapperRule { name: "doas", semantic: true },
    WrapperRule { name: "su", semantic: true },
    WrapperRule { name: "nice", semantic: true },
    WrapperRule { name: "ionice", semantic: true },
    WrapperRule { name: "timeout", semantic: true },
    WrapperRule { name: "stdbuf", semantic: true },
    WrapperRule { name: "xargs", semantic: true },
    WrapperRule { name: "chroot", semantic: true },
];

/// Outcome of looking at a segment's first token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Unwrapped {
    pub wrapper: Option<WrapperUse>,
    /// Argv of the command that actually runs, as far as analysis can tell.
    pub effective_argv: Vec<String>,
}

fn wrapper_name(token: &str) -> String {
    let base = token.rsplit(['/', '\\']).next().unwrap_or(token);
    let lower = base.to_ascii_lowercase();
    lower.strip_suffix(".exe").map_or(lower.clone(), str::to_string)
}

fn is_env_assignment(token: &str) -> bool {
    match token.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

fn is_split_string_flag(token: &str) -> bool {
    token == "--split-string"
        || token.starts_with("--split-string=")
        || (token.starts_with('-') && !token.starts_with("--") && token.contains('S'))
}

fn use_of(name: &str, disposition: WrapperDisposition) -> Option<WrapperUse> {
    Some(WrapperUse {
        name: name.to_string(),
        disposition,
    })
}

/// Classify `argv[0]` against the wrapper table and unwrap one level.
pub(crate) fn unwrap_segment(argv: &[String]) -> Unwrapped {
    let opaque = |wrapper| Unwrapped {
        wrapper,
        effective_argv: argv.to_vec(),
    };
    let Some(first) = argv.first() else {
        return opaque(None);
    };
    let name = wrapper_name(first);
    let Some(rule) = WRAPPERS.iter().find(|rule| rule.name == name) else {
        return opaque(None);
    };
    if rule.semantic {
        return opaque(use_of(rule.name, WrapperDisposition::Semantic));
    }

    let rest = argv.get(1..).unwrap_or(&[]);
    let mut index = 0;
    let mut options_done = false;
    while let Some(token) = rest.get(index) {
        if !options_done && token == "--" {
            options_done = true;
            index += 1;
            continue;
        }
        if rule.name == "env" && !options_done && is_split_string_flag(token) {
            return opaque(use_of(rule.name, WrapperDisposition::Unsafe));
        }
        if !options_done && token.starts_with('-') {
            // Any option (env -i, env -u, command -v, nohup --help) changes behavior.
            return opaque(use_of(rule.name, WrapperDisposition::Semantic));
        }
        if rule.name == "env" && is_env_assignment(token) {
            return opaque(use_of(rule.name, WrapperDisposition::Semantic));
        }
        break;
    }

    let wrapped = rest.get(index..).unwrap_or(&[]);
    if wrapped.is_empty() {
        return opaque(use_of(rule.name, WrapperDisposition::Semantic));
    }
    Unwrapped {
        wrapper: use_of(rule.name, WrapperDisposition::Transparent),
        effective_argv: wrapped.to_vec(),
    }
}
