//! Sandbox launch configuration and bind mount types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Container path where the sandbox mounts the session workspace.
pub const DEFAULT_WORKSPACE_MOUNT: &str = "/workspace";
/// Container path where the sandbox mounts the agent's own workspace.
pub const AGENT_WORKSPACE_MOUNT: &str = "/agent";

/// A parsed `source:target[:mode]` bind mount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMountSpec {
    /// Host path.
    pub source: String,
    /// Container path.
    pub target: String,
    /// `ro`, `rw` and similar options, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// Why a bind mount was refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockedBindReason {
    /// Source equals or is nested under a blocked host path.
    Targets {
        /// The blocked path that matched.
        blocked_path: String,
    },
    /// Source is an ancestor of a blocked host path (e.g. `/`).
    Covers {
        /// The blocked path underneath the source.
        blocked_path: String,
    },
    /// Source is relative or empty.
    NonAbsolute {
        /// Source as written.
        source: String,
    },
    /// Source resolves outside every allowed root.
    OutsideAllowedRoots {
        /// Configured roots.
        allowed_roots: Vec<String>,
    },
    /// Target shadows a reserved container path.
    ReservedTarget {
        /// Target as written.
        target: String,
    },
}

/// Per-call switches for [`validate_bind_mounts`](crate::sandbox::validate_bind_mounts).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindValidationOptions {
    /// Host roots bind sources must resolve under.
    pub allowed_source_roots: Vec<PathBuf>,
    /// Skip the allowed-roots check.
    pub allow_sources_outside_allowed_roots: bool,
    /// Let binds shadow `reserved_targets`.
    pub allow_reserved_container_targets: bool,
    /// Container paths the sandbox relies on.
    pub reserved_targets: Vec<String>,
}

/// The parts of a container launch configuration that affect isolation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxLaunchConfig {
    /// Bind specs in `source:target[:mode]` form.
    #[serde(default)]
    pub binds: Vec<String>,
    /// Container network mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Seccomp profile path or name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seccomp_profile: Option<String>,
    /// `AppArmor` profile name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,
    /// Host roots bind sources must resolve under; empty disables the check.
    #[serde(default)]
    pub allowed_source_roots: Vec<PathBuf>,
    /// Skip the allowed-roots check.
    #[serde(default)]
    pub allow_sources_outside_allowed_roots: bool,
    /// Let binds shadow the workspace mounts.
    #[serde(default)]
    pub allow_reserved_container_targets: bool,
    /// Container path the session workspace is mounted at.
    #[serde(default = "default_workspace_mount")]
    pub workspace_mount: String,
}

fn default_workspace_mount() -> String {
    DEFAULT_WORKSPACE_MOUNT.to_string()
}

impl Default for SandboxLaunchConfig {
    fn default() -> Self {
        Self {
            binds: Vec::new(),
            network: None,
            seccomp_profile: None,
            apparmor_profile: None,
            allowed_source_roots: Vec::new(),
            allow_sources_outside_allowed_roots: false,
            allow_reserved_container_targets: false,
            workspace_mount: default_workspace_mount(),
        }
    }
}

impl SandboxLaunchConfig {
    /// Bind validation options implied by this configuration.
    #[must_use]
    pub fn bind_options(&self) -> BindValidationOptions {
        let mut reserved_targets = vec![self.workspace_mount.clone()];
        if self.workspace_mount != AGENT_WORKSPACE_MOUNT {
            reserved_targets.push(AGENT_WORKSPACE_MOUNT.to_string());
        }
        BindValidationOptions {
            allowed_source_roots: self.allowed_source_roots.clone(),
            allow_sources_outside_allowed_roots: self.allow_sources_outside_allowed_roots,
            allow_reserved_container_targets: self.allow_reserved_container_targets,
            reserved_targets,
        }
    }
}
