//! Sandbox launch validation.
//!
//! Everything here runs before the container engine is invoked and either
//! returns `Ok` or a [`GuardError`] with code `E_SECURITY_VIOLATION` naming the
//! rule and the offending value. Nothing is downgraded to a warning.
//!
//! # Key Operations
//!
//! - [`validate_sandbox_security`] - full check of a [`SandboxLaunchConfig`]
//! - [`validate_bind_mounts`] - bind denylist, reserved targets, allowed roots
//! - [`assert_no_path_alias_escape`] - symlink and hardlink boundary walk

mod mounts;
mod path_guard;
pub mod registry;

pub use mounts::{get_blocked_bind_reason, parse_bind_mount, validate_bind_mounts, BLOCKED_HOST_PATHS};
pub use path_guard::{assert_no_path_alias_escape, PathAliasPolicy};

use crate::error::{GuardError, GuardResult, SecurityRule};
use crate::model::{BindMountSpec, SandboxLaunchConfig};

fn profile_violation(rule: SecurityRule, field: &str, value: &str, fix: &str) -> GuardError {
    GuardError::security_violation(
        rule,
        format!("{field} {value:?} disables sandbox isolation"),
        serde_json::json!({
            "field": field,
            "value": value,
            "fix": fix,
        }),
    )
}

/// Reject network modes that share a namespace with the host or another container.
pub fn validate_network_mode(network: Option<&str>) -> GuardResult<()> {
    let Some(raw) = network else {
        return Ok(());
    };
    let mode = raw.trim().to_ascii_lowercase();
    if mode == "host" || mode.starts_with("container:") {
        return Err(profile_violation(
            SecurityRule::NetworkMode,
            "network",
            raw,
            "Use \"none\" or a dedicated bridge network",
        ));
    }
    Ok(())
}

/// Reject `unconfined` seccomp.
pub fn validate_seccomp_profile(profile: Option<&str>) -> GuardResult<()> {
    match profile {
        Some(raw) if raw.trim().eq_ignore_ascii_case("unconfined") => Err(profile_violation(
            SecurityRule::SeccompProfile,
            "seccomp_profile",
            raw,
            "Remove seccomp_profile to use the engine default, or supply a custom profile",
        )),
        _ => Ok(()),
    }
}

/// Reject the `unconfined` `AppArmor` profile.
pub fn validate_apparmor_profile(profile: Option<&str>) -> GuardResult<()> {
    match profile {
        Some(raw) if raw.trim().eq_ignore_ascii_case("unconfined") => Err(profile_violation(
            SecurityRule::ApparmorProfile,
            "apparmor_profile",
            raw,
            "Remove apparmor_profile to use the engine default, or name a confining profile",
        )),
        _ => Ok(()),
    }
}

/// Validate binds, network and isolation profiles of a launch configuration.
///
/// Returns the parsed binds on success.
pub fn validate_sandbox_security(config: &SandboxLaunchConfig) -> GuardResult<Vec<BindMountSpec>> {
    let binds = validate_bind_mounts(&config.binds, &config.bind_options())?;
    validate_network_mode(config.network.as_deref())?;
    validate_seccomp_profile(config.seccomp_profile.as_deref())?;
    validate_apparmor_profile(config.apparmor_profile.as_deref())?;
    tracing::debug!(binds = binds.len(), "sandbox configuration validated");
    Ok(binds)
}
