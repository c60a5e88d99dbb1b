//! Safe-bin usage checks.
//!
//! A safe bin is trusted only while it cannot be pointed at files: none of its
//! arguments may look like a path or name an existing entry under `cwd`.

use crate::model::{CommandSegment, Platform};
use std::path::{Path, PathBuf};

fn is_drive_path(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some(letter), Some(':'), Some('/' | '\\')) if letter.is_ascii_alphabetic()
    )
}

/// Tokens that could reference the filesystem once the shell sees them.
///
/// Glob, brace and parameter expansion characters count even when the token
/// was quoted: `{.env,x}` becomes `.env x` once the shell expands it.
fn is_path_like_token(value: &str, platform: Platform) -> bool {
    value == "."
        || value == ".."
        || value.starts_with('~')
        || value.contains('/')
        || (platform.is_windows() && value.contains('\\'))
        || is_drive_path(value)
        || value.contains(['*', '?', '[', '$', '{', '}'])
}

fn exists_relative(cwd: &Path, value: &str) -> bool {
    std::fs::symlink_metadata(cwd.join(value)).is_ok()
}

fn value_is_unsafe(value: &str, cwd: Option<&Path>, platform: Platform) -> bool {
    if value.is_empty() {
        return false;
    }
    if is_path_like_token(value, platform) {
        return true;
    }
    match cwd {
        Some(dir) => exists_relative(dir, value),
        // Without a directory to check against, assume the worst.
        None => true,
    }
}

fn name_in_set(name: &str, safe_bins: &[String], platform: Platform) -> bool {
    safe_bins.iter().any(|bin| {
        let bin = bin.trim();
        if platform.case_insensitive_paths() {
            bin.eq_ignore_ascii_case(name)
        } else {
            bin == name
        }
    })
}

/// Whether `segment` is a harmless invocation of a configured safe bin.
pub fn is_safe_bin_usage(
    segment: &CommandSegment,
    safe_bins: &[String],
    cwd: Option<&Path>,
    platform: Platform,
) -> bool {
    if segment.is_unsafe_wrapper() {
        return false;
    }
    let Some(resolution) = segment.resolution.as_ref() else {
        return false;
    };
    if resolution.resolved_path.is_none() || !resolution.via_path_search {
        return false;
    }
    if !name_in_set(&resolution.executable_name, safe_bins, platform) {
        return false;
    }

    let fallback_cwd: Option<PathBuf> = match cwd {
        Some(_) => None,
        None => std::env::current_dir().ok(),
    };
    let cwd = cwd.or(fallback_cwd.as_deref());

    segment.args().iter().all(|arg| !arg_is_unsafe(arg, cwd, platform))
}

fn arg_is_unsafe(arg: &str, cwd: Option<&Path>, platform: Platform) -> bool {
    if arg == "-" {
        return false;
    }
    if is_path_like_token(arg, platform) {
        return true;
    }
    if let Some((_, value)) = arg.split_once('=').filter(|_| arg.starts_with('-')) {
        return value_is_unsafe(value, cwd, platform);
    }
    if arg.starts_with("--") {
        return false;
    }
    match arg.strip_prefix('-') {
        // `-f.env` and `-rf.env`: the value may be glued on after any flag letter.
        Some(cluster) => cluster
            .char_indices()
            .skip(1)
            .any(|(at, _)| cluster.get(at..).is_some_and(|tail| value_is_unsafe(tail, cwd, platform))),
        None => value_is_unsafe(arg, cwd, platform),
    }
}
