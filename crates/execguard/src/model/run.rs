//! Run lifecycle records.

use crate::model::RunId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a supervised run. Ordered; transitions never go back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Registered; the OS process is not up yet.
    Starting,
    /// The process is up.
    Running,
    /// A termination reason is set or the process has exited; finalize pending.
    Exiting,
    /// Finalized; the outcome will not change.
    Exited,
}

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// Cancelled by the caller or by scope replacement.
    ManualCancel,
    /// The overall timeout fired.
    OverallTimeout,
    /// No output arrived within the no-output timeout.
    NoOutputTimeout,
    /// The OS refused to start the process.
    SpawnError,
    /// Killed by a signal nobody in the supervisor requested.
    Signal,
    /// Exited on its own.
    Exit,
}

impl TerminationReason {
    /// Kebab-case name used in JSON and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManualCancel => "manual-cancel",
            Self::OverallTimeout => "overall-timeout",
            Self::NoOutputTimeout => "no-output-timeout",
            Self::SpawnError => "spawn-error",
            Self::Signal => "signal",
            Self::Exit => "exit",
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry entry for one run. Lives only for the lifetime of the process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Owning session.
    pub session_id: String,
    /// Backend that requested the run.
    pub backend_id: String,
    /// Scope used for replacement and bulk cancel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_key: Option<String>,
    /// Current lifecycle state.
    pub state: RunState,
    /// OS pid, once spawned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Timestamps are milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// When the process was spawned.
    pub started_at_ms: u64,
    /// Last time output arrived.
    pub last_output_at_ms: u64,
    /// Last state change.
    pub updated_at_ms: u64,
    /// Set once the run starts exiting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    /// Exit code, when the process exited normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Signal name, e.g. `SIGKILL`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<String>,
}

/// Outcome reported by [`ManagedRun::wait`](crate::process::ManagedRun::wait).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunExit {
    /// Why the run ended.
    pub reason: TerminationReason,
    /// Exit code, if any.
    pub exit_code: Option<i32>,
    /// Terminating signal, if any.
    pub exit_signal: Option<String>,
    /// Wall time from spawn to settle.
    pub duration_ms: u64,
    /// Captured stdout; empty when capture is off.
    pub stdout: String,
    /// Captured stderr; always empty for PTY runs.
    pub stderr: String,
    /// The overall timeout fired.
    pub timed_out: bool,
    /// The no-output timeout fired.
    pub no_output_timed_out: bool,
    /// Captured output hit the byte limit and was cut.
    pub output_truncated: bool,
}
