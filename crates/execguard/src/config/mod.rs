//! Host configuration document.
//!
//! A single [`GuardConfig`] holds the exec approval settings, the sandbox
//! launch configuration and supervisor limits. Every section is optional in
//! the file and unknown keys are rejected.

use crate::error::{GuardError, GuardResult};
use crate::model::{ExecApprovalsConfig, SandboxLaunchConfig};
use crate::process::terminator::DEFAULT_KILL_GRACE_MS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Exited run records kept before the oldest are evicted.
pub const DEFAULT_MAX_EXITED_RECORDS: usize = 2_000;
/// Captured stdout or stderr kept per run before truncation.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 8 * 1024 * 1024;

/// Top-level host configuration document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Exec approval settings.
    #[serde(default)]
    pub exec: ExecApprovalsConfig,
    /// Sandbox launch settings checked by `validate-sandbox`.
    #[serde(default)]
    pub sandbox: SandboxLaunchConfig,
    /// Supervisor limits.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Limits applied by a [`ProcessSupervisor`](crate::process::ProcessSupervisor).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    /// Finalized records kept for `get_record` after a run leaves the active set.
    #[serde(default = "default_max_exited_records")]
    pub max_exited_records: usize,
    /// Capture budget across stdout and stderr of one run.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Grace period between SIGTERM and SIGKILL on manual cancel.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
}

fn default_max_exited_records() -> usize {
    DEFAULT_MAX_EXITED_RECORDS
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_kill_grace_ms() -> u64 {
    DEFAULT_KILL_GRACE_MS
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_exited_records: DEFAULT_MAX_EXITED_RECORDS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            kill_grace_ms: DEFAULT_KILL_GRACE_MS,
        }
    }
}

enum ConfigFormat {
    Json,
    Yaml,
}

fn format_for(path: &Path) -> Option<ConfigFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "json" => Some(ConfigFormat::Json),
        "yaml" | "yml" => Some(ConfigFormat::Yaml),
        _ => None,
    }
}

/// Load a [`GuardConfig`] from a `.json`, `.yaml` or `.yml` file.
pub fn load_config_file(path: &Path) -> GuardResult<GuardConfig> {
    let format = format_for(path).ok_or_else(|| {
        GuardError::config(
            format!("unsupported config file extension: {}", path.display()),
            serde_json::json!({
                "path": path.display().to_string(),
                "fix": "Use a .json, .yaml or .yml file",
            }),
        )
    })?;
    let data = fs::read_to_string(path)
        .map_err(|err| GuardError::io(format!("failed to read config {}", path.display()), err))?;
    let parsed = match format {
        ConfigFormat::Json => serde_json::from_str(&data).map_err(|err| err.to_string()),
        ConfigFormat::Yaml => serde_yml::from_str(&data).map_err(|err| err.to_string()),
    };
    parsed.map_err(|reason| {
        GuardError::config(
            format!("failed to parse config {}", path.display()),
            serde_json::json!({
                "path": path.display().to_string(),
                "error": reason,
            }),
        )
    })
}
