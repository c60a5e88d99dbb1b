//! Bind mount parsing and validation.

use super::path_guard::{assert_no_path_alias_escape, PathAliasPolicy};
use crate::analysis::normalize_lexically;
use crate::error::{GuardError, GuardResult, SecurityRule};
use crate::model::{BindMountSpec, BindValidationOptions, BlockedBindReason};
use std::path::{Path, PathBuf};

/// Host paths a sandbox must never see, nor be given an ancestor of.
pub const BLOCKED_HOST_PATHS: &[&str] = &[
    "/etc",
    "/private/etc",
    "/proc",
    "/sys",
    "/dev",
    "/root",
    "/boot",
    "/run",
    "/var/run",
    "/private/var/run",
    "/var/run/docker.sock",
    "/private/var/run/docker.sock",
    "/run/docker.sock",
];

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    matches!(
        (bytes.first(), bytes.get(1), bytes.get(2)),
        (Some(letter), Some(b':'), Some(b'/' | b'\\')) if letter.is_ascii_alphabetic()
    )
}

fn invalid_spec(raw: &str, reason: &str) -> GuardError {
    GuardError::security_violation(
        SecurityRule::InvalidBindSpec,
        format!("invalid bind mount {raw:?}: {reason}"),
        serde_json::json!({
            "bind": raw,
            "fix": "Use the form source:target[:mode]",
        }),
    )
}

/// Parse a `source:target[:mode]` bind string.
///
/// A leading Windows drive letter stays part of the source.
pub fn parse_bind_mount(raw: &str) -> GuardResult<BindMountSpec> {
    let trimmed = raw.trim();
    let (drive, rest) = if has_drive_prefix(trimmed) {
        trimmed.split_at(2)
    } else {
        ("", trimmed)
    };
    let parts: Vec<&str> = rest.split(':').collect();
    let (source, target, mode) = match parts.as_slice() {
        [source, target] => (*source, *target, None),
        [source, target, mode] => (*source, *target, Some(*mode)),
        _ => return Err(invalid_spec(raw, "expected two or three ':'-separated fields")),
    };
    if source.is_empty() || target.is_empty() || mode.is_some_and(str::is_empty) {
        return Err(invalid_spec(raw, "empty field"));
    }
    Ok(BindMountSpec {
        source: format!("{drive}{source}"),
        target: target.to_string(),
        mode: mode.map(str::to_string),
    })
}

fn is_absolute_host_path(source: &str) -> bool {
    source.starts_with('/') || has_drive_prefix(source)
}

/// Denylist check on an absolute, normalized host path.
fn denylist_reason(path: &Path) -> Option<BlockedBindReason> {
    if path == Path::new("/") {
        return Some(BlockedBindReason::Covers {
            blocked_path: "/".to_string(),
        });
    }
    for blocked in BLOCKED_HOST_PATHS {
        let blocked_path = Path::new(blocked);
        if path.starts_with(blocked_path) {
            return Some(BlockedBindReason::Targets {
                blocked_path: (*blocked).to_string(),
            });
        }
    }
    BLOCKED_HOST_PATHS
        .iter()
        .find(|blocked| Path::new(blocked).starts_with(path))
        .map(|blocked| BlockedBindReason::Covers {
            blocked_path: (*blocked).to_string(),
        })
}

fn source_reason(source: &str) -> Option<BlockedBindReason> {
    if !is_absolute_host_path(source) {
        return Some(BlockedBindReason::NonAbsolute {
            source: source.to_string(),
        });
    }
    denylist_reason(&normalize_lexically(Path::new(source)))
}

/// Why `bind` is unsafe on its face, before any filesystem access.
///
/// Reports a non-absolute source, a source inside a blocked host path, or a
/// source that is an ancestor of one (including `/`). A string that does not
/// parse as a bind is judged by its whole text as the source.
#[must_use]
pub fn get_blocked_bind_reason(bind: &str) -> Option<BlockedBindReason> {
    match parse_bind_mount(bind) {
        Ok(spec) => source_reason(&spec.source),
        Err(_) => source_reason(bind.trim()),
    }
}

fn reason_error(reason: &BlockedBindReason, spec: &BindMountSpec, resolved: Option<&Path>) -> GuardError {
    let resolved_note = resolved.map_or_else(String::new, |p| format!(" (resolves to {})", p.display()));
    let context = serde_json::json!({
        "source": spec.source,
        "target": spec.target,
        "resolved": resolved.map(|p| p.display().to_string()),
        "reason": reason,
    });
    match reason {
        BlockedBindReason::Targets { blocked_path } => GuardError::security_violation(
            SecurityRule::BlockedHostPath,
            format!(
                "bind source {}{resolved_note} is inside blocked host path {blocked_path}",
                spec.source
            ),
            with_fix(context, "Mount a project directory instead of a system path"),
        ),
        BlockedBindReason::Covers { blocked_path } => GuardError::security_violation(
            SecurityRule::CoversBlockedPath,
            format!(
                "bind source {}{resolved_note} would expose blocked host path {blocked_path}",
                spec.source
            ),
            with_fix(context, "Mount a narrower directory that does not contain system paths"),
        ),
        BlockedBindReason::NonAbsolute { source } => GuardError::security_violation(
            SecurityRule::NonAbsoluteSource,
            format!("bind source {source} must be an absolute host path"),
            with_fix(context, "Use an absolute host path as the bind source"),
        ),
        BlockedBindReason::OutsideAllowedRoots { allowed_roots } => GuardError::security_violation(
            SecurityRule::OutsideAllowedRoots,
            format!(
                "bind source {}{resolved_note} is outside allowed source roots [{}]",
                spec.source,
                allowed_roots.join(", ")
            ),
            with_fix(context, "Add the directory to allowed_source_roots or choose a path inside one"),
        ),
        BlockedBindReason::ReservedTarget { target } => GuardError::security_violation(
            SecurityRule::ReservedContainerTarget,
            format!("bind target {target} shadows a container path reserved by the sandbox"),
            with_fix(context, "Mount to a different container path or set allow_reserved_container_targets"),
        ),
    }
}

fn with_fix(mut context: serde_json::Value, fix: &str) -> serde_json::Value {
    if let Some(map) = context.as_object_mut() {
        map.insert("fix".to_string(), serde_json::Value::String(fix.to_string()));
    }
    context
}

fn reserved_reason(spec: &BindMountSpec, options: &BindValidationOptions) -> Option<BlockedBindReason> {
    if options.allow_reserved_container_targets {
        return None;
    }
    let target = normalize_lexically(Path::new(&spec.target));
    options
        .reserved_targets
        .iter()
        .map(|reserved| normalize_lexically(Path::new(reserved)))
        .find(|reserved| target.starts_with(reserved) || reserved.starts_with(&target))
        .map(|reserved| BlockedBindReason::ReservedTarget {
            target: reserved.display().to_string(),
        })
}

fn outside_roots(roots: &[PathBuf]) -> BlockedBindReason {
    BlockedBindReason::OutsideAllowedRoots {
        allowed_roots: roots.iter().map(|r| r.display().to_string()).collect(),
    }
}

/// Longest existing ancestor resolved through `realpath`, plus the missing tail.
fn resolve_host_realpath(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if let Ok(real) = std::fs::canonicalize(&existing) {
            return tail.iter().rev().fold(real, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.file_name().map(ToOwned::to_owned), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn containing_root<'r>(path: &Path, roots: &'r [PathBuf]) -> Option<&'r PathBuf> {
    roots.iter().find(|root| path.starts_with(root))
}

fn validate_one(spec: &BindMountSpec, options: &BindValidationOptions) -> GuardResult<()> {
    if let Some(reason) = source_reason(&spec.source) {
        return Err(reason_error(&reason, spec, None));
    }
    if let Some(reason) = reserved_reason(spec, options) {
        return Err(reason_error(&reason, spec, None));
    }

    let source = normalize_lexically(Path::new(&spec.source));
    let lexical_roots: Vec<PathBuf> = options
        .allowed_source_roots
        .iter()
        .map(|root| normalize_lexically(root))
        .collect();
    let enforce_roots = !options.allow_sources_outside_allowed_roots;
    if enforce_roots && containing_root(&source, &lexical_roots).is_none() {
        return Err(reason_error(&outside_roots(&options.allowed_source_roots), spec, None));
    }

    let resolved = resolve_host_realpath(&source);
    if let Some(reason) = denylist_reason(&resolved) {
        return Err(reason_error(&reason, spec, Some(&resolved)));
    }
    if enforce_roots {
        let real_roots: Vec<PathBuf> = lexical_roots.iter().map(|root| resolve_host_realpath(root)).collect();
        let Some(root) = containing_root(&resolved, &real_roots) else {
            return Err(reason_error(&outside_roots(&options.allowed_source_roots), spec, Some(&resolved)));
        };
        if std::fs::symlink_metadata(&source).is_ok() {
            if let Some(lexical_root) = containing_root(&source, &lexical_roots) {
                if lexical_root.exists() {
                    assert_no_path_alias_escape(&source, lexical_root, "bind source", PathAliasPolicy::default())?;
                }
            }
        }
        tracing::debug!(source = %spec.source, root = %root.display(), "bind source inside allowed root");
    }
    Ok(())
}

/// Validate every bind, stopping at the first violation.
///
/// Per bind, in order: denylist, reserved container target, allowed-root
/// containment, then the same denylist and containment checks on the real
/// path of the source so a planted symlink cannot lead outside. An empty
/// `allowed_source_roots` admits nothing unless sources outside the roots are
/// explicitly allowed.
pub fn validate_bind_mounts(binds: &[String], options: &BindValidationOptions) -> GuardResult<Vec<BindMountSpec>> {
    binds
        .iter()
        .map(|raw| {
            let spec = parse_bind_mount(raw)?;
            validate_one(&spec, options)?;
            Ok(spec)
        })
        .collect()
}
