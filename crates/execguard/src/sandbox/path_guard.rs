//! Filesystem boundary checks for symlink and hardlink aliases.

use crate::analysis::normalize_lexically;
use crate::error::{GuardError, GuardResult, SecurityRule};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

/// Switches for [`assert_no_path_alias_escape`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PathAliasPolicy {
    /// Accept a symlink as the last component without resolving it.
    ///
    /// Only unlink-style operations may set this: removing a link never
    /// touches what it points at.
    pub allow_final_symlink: bool,
}

impl PathAliasPolicy {
    /// Policy for unlink-style operations.
    pub const UNLINK: Self = Self {
        allow_final_symlink: true,
    };
}

fn violation(rule: SecurityRule, label: &str, path: &Path, root: &Path, extra: Option<&Path>) -> GuardError {
    let message = match rule {
        SecurityRule::SymlinkEscape => format!("{label}: symlink escapes boundary: {}", path.display()),
        SecurityRule::HardlinkEscape => format!("{label}: hardlink escapes boundary: {}", path.display()),
        _ => format!("{label}: path is outside boundary: {}", path.display()),
    };
    GuardError::security_violation(
        rule,
        message,
        serde_json::json!({
            "path": path.display().to_string(),
            "root": root.display().to_string(),
            "resolved": extra.map(|p| p.display().to_string()),
            "fix": "Use a path whose real location stays inside the boundary",
        }),
    )
}

/// Location a symlink points at, resolved without requiring it to exist.
fn resolve_link(link: &Path) -> GuardResult<PathBuf> {
    match std::fs::canonicalize(link) {
        Ok(real) => Ok(real),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let target = std::fs::read_link(link)
                .map_err(|e| GuardError::io(format!("failed to read link {}", link.display()), e))?;
            let base = link.parent().unwrap_or_else(|| Path::new("/"));
            Ok(normalize_lexically(&base.join(target)))
        }
        Err(err) => Err(GuardError::io(format!("failed to resolve {}", link.display()), err)),
    }
}

/// Assert that `absolute_path` cannot reach outside `root_path` through an alias.
///
/// Every component below the root is inspected with `lstat`. A symlink must
/// resolve inside the real root and the walk continues from its target. A
/// regular file with more than one link must have all of them inside the root.
pub fn assert_no_path_alias_escape(
    absolute_path: &Path,
    root_path: &Path,
    boundary_label: &str,
    policy: PathAliasPolicy,
) -> GuardResult<()> {
    if !absolute_path.is_absolute() {
        return Err(violation(SecurityRule::OutsideBoundary, boundary_label, absolute_path, root_path, None));
    }
    let root_real = std::fs::canonicalize(root_path)
        .map_err(|e| GuardError::io(format!("{boundary_label}: cannot resolve root {}", root_path.display()), e))?;
    let target = normalize_lexically(absolute_path);
    let relative = target
        .strip_prefix(normalize_lexically(root_path))
        .or_else(|_| target.strip_prefix(&root_real))
        .map_err(|_| violation(SecurityRule::OutsideBoundary, boundary_label, &target, &root_real, None))?
        .to_path_buf();
    if relative.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(violation(SecurityRule::OutsideBoundary, boundary_label, &target, &root_real, None));
    }

    let parts: Vec<_> = relative.components().collect();
    let mut current = root_real.clone();
    let mut final_is_link = false;
    for (index, part) in parts.iter().enumerate() {
        let candidate = current.join(part);
        let meta = match std::fs::symlink_metadata(&candidate) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                // Nothing exists past here, so nothing can alias.
                current = candidate;
                break;
            }
            Err(err) => {
                return Err(GuardError::io(format!("{boundary_label}: cannot inspect {}", candidate.display()), err));
            }
        };
        if !meta.file_type().is_symlink() {
            current = candidate;
            continue;
        }
        let is_last = index + 1 == parts.len();
        if is_last && policy.allow_final_symlink {
            final_is_link = true;
            current = candidate;
            break;
        }
        let resolved = resolve_link(&candidate)?;
        if !resolved.starts_with(&root_real) {
            return Err(violation(
                SecurityRule::SymlinkEscape,
                boundary_label,
                &candidate,
                &root_real,
                Some(&resolved),
            ));
        }
        current = resolved;
    }

    if !final_is_link {
        check_hardlinks(&current, &root_real, boundary_label)?;
    }
    Ok(())
}

#[cfg(unix)]
fn check_hardlinks(path: &Path, root_real: &Path, label: &str) -> GuardResult<()> {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    if !meta.is_file() || meta.nlink() <= 1 {
        return Ok(());
    }
    let (dev, ino) = (meta.dev(), meta.ino());
    let inside = walkdir::WalkDir::new(root_real)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .metadata()
                .is_ok_and(|m| m.dev() == dev && m.ino() == ino)
        })
        .count();
    if u64::try_from(inside).unwrap_or(u64::MAX) < meta.nlink() {
        return Err(violation(SecurityRule::HardlinkEscape, label, path, root_real, None));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_hardlinks(_path: &Path, _root_real: &Path, _label: &str) -> GuardResult<()> {
    Ok(())
}
