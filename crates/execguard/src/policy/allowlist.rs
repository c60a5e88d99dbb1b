//! Allowlist pattern matching against resolved executables.

use crate::analysis::has_path_separator;
use crate::model::{AllowlistEntry, ExecutableResolution, Platform};
use regex::RegexBuilder;
use std::path::Path;

/// Upper bound on compiled pattern size.
const MAX_PATTERN_REGEX_BYTES: usize = 1 << 16;

fn pattern_has_path(pattern: &str, platform: Platform) -> bool {
    pattern.starts_with('~') || has_path_separator(pattern, platform)
}

fn expand_home(pattern: &str) -> String {
    match pattern.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => {
            match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
                Some(home) => format!("{}{rest}", home.to_string_lossy()),
                None => pattern.to_string(),
            }
        }
        _ => pattern.to_string(),
    }
}

fn normalize_separators(value: &str, platform: Platform) -> String {
    if platform.is_windows() {
        value.replace('\\', "/")
    } else {
        value.to_string()
    }
}

/// Translate a `*` / `**` / `?` glob into an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.next_if_eq(&'*').is_some() {
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Whether `candidate` matches the glob `pattern` under the platform's case rules.
///
/// A pattern that fails to compile matches nothing.
fn glob_matches(pattern: &str, candidate: &str, platform: Platform) -> bool {
    let pattern = normalize_separators(pattern, platform);
    let candidate = normalize_separators(candidate, platform);
    RegexBuilder::new(&glob_to_regex(&pattern))
        .case_insensitive(platform.case_insensitive_paths())
        .size_limit(MAX_PATTERN_REGEX_BYTES)
        .build()
        .is_ok_and(|re| re.is_match(&candidate))
}

fn path_matches(pattern: &str, path: Option<&Path>, platform: Platform) -> bool {
    path.is_some_and(|p| glob_matches(pattern, &p.to_string_lossy(), platform))
}

fn entry_in_scope(entry: &AllowlistEntry, scope: Option<&str>) -> bool {
    match entry.scope.as_deref() {
        None => true,
        Some(entry_scope) => scope == Some(entry_scope),
    }
}

/// Find the first entry that admits `resolution`.
///
/// Path patterns match the resolved or canonical path. Bare-name patterns
/// match only executables found through a `PATH` search, so `./sh` never
/// inherits trust granted to `sh`.
pub fn match_allowlist<'a>(
    entries: &'a [AllowlistEntry],
    resolution: &ExecutableResolution,
    platform: Platform,
    scope: Option<&str>,
) -> Option<&'a AllowlistEntry> {
    if resolution.resolved_path.is_none() {
        return None;
    }
    entries.iter().find(|entry| {
        let pattern = entry.pattern.trim();
        if pattern.is_empty() || !entry_in_scope(entry, scope) {
            return false;
        }
        if pattern_has_path(pattern, platform) {
            let pattern = expand_home(pattern);
            path_matches(&pattern, resolution.resolved_path.as_deref(), platform)
                || path_matches(&pattern, resolution.canonical_path.as_deref(), platform)
        } else {
            resolution.via_path_search
                && glob_matches(pattern, &resolution.executable_name, platform)
        }
    })
}
