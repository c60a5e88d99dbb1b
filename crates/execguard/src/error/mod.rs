//! Error type shared by every execguard module.
//!
//! Errors carry a stable [`ErrorCode`], a human message, and an optional JSON
//! context with the offending values and a `fix` hint. Mount, profile and path
//! boundary failures additionally name the [`SecurityRule`] that was violated.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Result alias used across the crate.
pub type GuardResult<T> = Result<T, GuardError>;

/// Machine-readable error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Command rejected by allowlist policy.
    #[serde(rename = "E_POLICY_DENIED")]
    PolicyDenied,
    /// Mount, network, profile or path boundary violation.
    #[serde(rename = "E_SECURITY_VIOLATION")]
    SecurityViolation,
    /// The OS failed to create the process.
    #[serde(rename = "E_SPAWN")]
    Spawn,
    /// Filesystem or pipe I/O failed.
    #[serde(rename = "E_IO")]
    Io,
    /// Configuration could not be loaded or parsed.
    #[serde(rename = "E_CONFIG")]
    Config,
    /// Invariant broken inside the crate.
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// Stable code string, e.g. `E_POLICY_DENIED`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PolicyDenied => "E_POLICY_DENIED",
            Self::SecurityViolation => "E_SECURITY_VIOLATION",
            Self::Spawn => "E_SPAWN",
            Self::Io => "E_IO",
            Self::Config => "E_CONFIG",
            Self::Internal => "E_INTERNAL",
        }
    }

    /// Process exit code used by the CLI for this category.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::PolicyDenied => 3,
            Self::SecurityViolation => 4,
            Self::Spawn => 5,
            Self::Io => 6,
            Self::Config => 7,
            Self::Internal => 8,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The security rule a [`ErrorCode::SecurityViolation`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityRule {
    /// Bind source is a blocked host path or sits under one.
    BlockedHostPath,
    /// Bind source is an ancestor of a blocked host path.
    CoversBlockedPath,
    /// Bind source is not an absolute path.
    NonAbsoluteSource,
    /// Bind spec is not `source:target[:mode]`.
    InvalidBindSpec,
    /// Bind target shadows a container path the sandbox relies on.
    ReservedContainerTarget,
    /// Bind source resolves outside the allowed source roots.
    OutsideAllowedRoots,
    /// Network mode shares a namespace with the host or another container.
    NetworkMode,
    /// Seccomp is disabled.
    SeccompProfile,
    /// `AppArmor` confinement is disabled.
    ApparmorProfile,
    /// A symlink leads outside the boundary.
    SymlinkEscape,
    /// A hardlinked file aliases content outside the boundary.
    HardlinkEscape,
    /// The path itself lies outside the boundary.
    OutsideBoundary,
}

impl SecurityRule {
    /// Kebab-case rule name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlockedHostPath => "blocked-host-path",
            Self::CoversBlockedPath => "covers-blocked-path",
            Self::NonAbsoluteSource => "non-absolute-source",
            Self::InvalidBindSpec => "invalid-bind-spec",
            Self::ReservedContainerTarget => "reserved-container-target",
            Self::OutsideAllowedRoots => "outside-allowed-roots",
            Self::NetworkMode => "network-mode",
            Self::SeccompProfile => "seccomp-profile",
            Self::ApparmorProfile => "apparmor-profile",
            Self::SymlinkEscape => "symlink-escape",
            Self::HardlinkEscape => "hardlink-escape",
            Self::OutsideBoundary => "outside-boundary",
        }
    }
}

impl fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every fallible execguard operation.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct GuardError {
    /// Category, which also picks the CLI exit code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Rule broken, for security violations only.
    pub rule: Option<SecurityRule>,
    /// Offending values plus an optional `fix` hint.
    pub context: Option<Value>,
}

impl Diagnostic for GuardError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.context
            .as_ref()
            .and_then(|ctx| ctx.get("fix"))
            .and_then(Value::as_str)
            .map(|fix| Box::new(fix.to_string()) as Box<dyn fmt::Display + 'a>)
    }
}

impl GuardError {
    /// The allowlist or env guard refused a command.
    pub fn policy_denied(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code: ErrorCode::PolicyDenied,
            message: message.into(),
            rule: None,
            context: context.into(),
        }
    }

    /// Security violations always name the rule and the offending path.
    pub fn security_violation(
        rule: SecurityRule,
        message: impl Into<String>,
        context: impl Into<Option<Value>>,
    ) -> Self {
        let message = message.into();
        tracing::warn!(rule = %rule, %message, "security violation");
        Self {
            code: ErrorCode::SecurityViolation,
            message,
            rule: Some(rule),
            context: context.into(),
        }
    }

    /// The OS could not create the process.
    pub fn spawn(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self {
            code: ErrorCode::Spawn,
            message: message.into(),
            rule: None,
            context: Some(serde_json::json!({ "source": err.to_string() })),
        }
    }

    /// Filesystem or pipe I/O failed.
    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self {
            code: ErrorCode::Io,
            message: message.into(),
            rule: None,
            context: Some(serde_json::json!({ "source": err.to_string() })),
        }
    }

    /// A config file could not be read as a [`GuardConfig`](crate::config::GuardConfig).
    pub fn config(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code: ErrorCode::Config,
            message: message.into(),
            rule: None,
            context: context.into(),
        }
    }

    /// A broken internal invariant.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: message.into(),
            rule: None,
            context: None,
        }
    }

    /// Serializable summary for JSON output.
    #[must_use]
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.as_str().to_string(),
            message: self.message.clone(),
            rule: self.rule.map(|rule| rule.as_str().to_string()),
            context: self.context.clone(),
        }
    }
}

/// Wire form of a [`GuardError`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code string.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Security rule name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    /// Structured context, including any `fix` hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}
