//! Executable resolution: literal paths and `PATH` search.
//!
//! Host-platform lookups go through `which`. Analyses for another platform
//! fall back to a plain directory scan that applies that platform's `PATH`
//! separator and `PATHEXT` rules.

use crate::model::{ExecutableResolution, Platform};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

const DEFAULT_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD";

/// Whether a token names a path rather than a bare command.
pub(crate) fn has_path_separator(token: &str, platform: Platform) -> bool {
    token.contains('/') || (platform.is_windows() && token.contains('\\'))
}

fn env_lookup(env: Option<&HashMap<String, String>>, key: &str, platform: Platform) -> Option<OsString> {
    match env {
        Some(map) => {
            if platform.is_windows() {
                map.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| OsString::from(value))
            } else {
                map.get(key).map(OsString::from)
            }
        }
        None => std::env::var_os(key),
    }
}

fn search_dirs(env: Option<&HashMap<String, String>>, platform: Platform) -> Vec<PathBuf> {
    let Some(path) = env_lookup(env, "PATH", platform) else {
        return Vec::new();
    };
    let separator = if platform.is_windows() { ';' } else { ':' };
    path.to_string_lossy()
        .split(separator)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

/// Lexically remove `.` and `..` without touching the filesystem.
///
/// `..` never climbs above the root of an absolute path.
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    normalized.pop();
                    depth -= 1;
                } else if !path.is_absolute() {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => normalized.push(component.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

fn expand_home(token: &str, env: Option<&HashMap<String, String>>, platform: Platform) -> PathBuf {
    if let Some(rest) = token.strip_prefix("~/") {
        if let Some(home) = env_lookup(env, "HOME", platform) {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(token)
}

fn executable_name(path: &Path, platform: Platform) -> String {
    let base = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if platform.is_windows() {
        let lower = base.to_ascii_lowercase();
        lower.strip_suffix(".exe").map_or(lower.clone(), str::to_string)
    } else {
        base
    }
}

fn candidates(dir: &Path, token: &str, env: Option<&HashMap<String, String>>, platform: Platform) -> Vec<PathBuf> {
    let base = dir.join(token);
    if !platform.is_windows() || Path::new(token).extension().is_some() {
        return vec![base];
    }
    let pathext = env_lookup(env, "PATHEXT", platform)
        .map_or_else(|| DEFAULT_PATHEXT.to_string(), |v| v.to_string_lossy().into_owned());
    let mut out = vec![base];
    out.extend(
        pathext
            .split(';')
            .filter(|ext| !ext.is_empty())
            .map(|ext| dir.join(format!("{token}{}", ext.to_ascii_lowercase()))),
    );
    out
}

fn search_path(
    token: &str,
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
    platform: Platform,
) -> Option<PathBuf> {
    if platform == Platform::current() {
        let path_var = env_lookup(env, "PATH", platform)?;
        let base = cwd.map(Path::to_path_buf).or_else(|| std::env::current_dir().ok())?;
        return which::which_in(token, Some(path_var), base).ok();
    }
    search_dirs(env, platform)
        .iter()
        .flat_map(|dir| candidates(dir, token, env, platform))
        .find(|candidate| is_executable_file(candidate))
}

/// Resolve the executable identity of `token`.
///
/// Tokens with a path separator are resolved against `cwd` and never searched
/// on `PATH`; bare names are searched on `PATH` only.
pub(crate) fn resolve_executable(
    token: &str,
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
    platform: Platform,
) -> ExecutableResolution {
    let via_path_search = !has_path_separator(token, platform) && !token.starts_with('~');
    let resolved_path = if via_path_search {
        search_path(token, cwd, env, platform)
    } else {
        let literal = expand_home(token, env, platform);
        let absolute = if literal.is_absolute() {
            Some(literal)
        } else {
            cwd.map(|dir| dir.join(literal))
        };
        absolute
            .map(|path| normalize_lexically(&path))
            .filter(|path| is_executable_file(path))
    };

    let canonical_path = resolved_path
        .as_deref()
        .and_then(|path| std::fs::canonicalize(path).ok());
    let executable_name = resolved_path
        .as_deref()
        .map_or_else(|| executable_name(Path::new(token), platform), |path| executable_name(path, platform));

    ExecutableResolution {
        raw_executable: token.to_string(),
        resolved_path,
        canonical_path,
        executable_name,
        via_path_search,
    }
}
