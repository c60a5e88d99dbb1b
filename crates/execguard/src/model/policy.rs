//! Exec approval configuration and allowlist outcomes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Binaries treated as harmless when invoked without filesystem arguments.
pub const DEFAULT_SAFE_BINS: &[&str] = &["jq", "grep", "cut", "sort", "uniq", "head", "tail", "tr", "wc"];

/// How exec requests are gated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecSecurity {
    /// Refuse every command.
    Deny,
    /// Run only allowlisted, safe-bin or trusted skill commands.
    #[default]
    Allowlist,
    /// Run anything.
    Full,
}

/// When the user is asked to approve a command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecAsk {
    /// Never ask; deny what the allowlist misses.
    Off,
    /// Ask only when the allowlist does not cover the command.
    #[default]
    OnMiss,
    /// Ask for every command, even allowlisted ones.
    Always,
}

/// A configured allowlist pattern.
///
/// Patterns containing a path separator or `~` are matched against the
/// resolved executable path and may use `*`, `**` and `?` globs. Bare names
/// match only commands that were looked up through `PATH`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    /// Glob or bare executable name.
    pub pattern: String,
    /// Agent scope the entry applies to; `None` applies everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// When the entry last let a command through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at_ms: Option<u64>,
    /// Command line of that use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_command: Option<String>,
    /// Executable the entry matched on that use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_resolved_path: Option<String>,
}

impl AllowlistEntry {
    /// Unscoped entry for `pattern`.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Self::default()
        }
    }

    /// Restrict the entry to one agent scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }
}

/// Exec approval settings supplied by the host configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecApprovalsConfig {
    /// Gate mode.
    #[serde(default)]
    pub security: ExecSecurity,
    /// When to ask the user.
    #[serde(default)]
    pub ask: ExecAsk,
    /// Trusted executable patterns.
    #[serde(default)]
    pub allowlist: Vec<AllowlistEntry>,
    /// Names that pass without an allowlist entry when given no file arguments.
    #[serde(default = "default_safe_bins")]
    pub safe_bins: Vec<String>,
    /// Canonical paths of binaries contributed by installed skills.
    #[serde(default)]
    pub skill_bins: Vec<PathBuf>,
    /// Let `skill_bins` through without an allowlist entry.
    #[serde(default)]
    pub auto_allow_skills: bool,
}

fn default_safe_bins() -> Vec<String> {
    DEFAULT_SAFE_BINS.iter().map(|s| (*s).to_string()).collect()
}

impl Default for ExecApprovalsConfig {
    fn default() -> Self {
        Self {
            security: ExecSecurity::default(),
            ask: ExecAsk::default(),
            allowlist: Vec::new(),
            safe_bins: default_safe_bins(),
            skill_bins: Vec::new(),
            auto_allow_skills: false,
        }
    }
}

/// Which rule let a segment through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SatisfiedBy {
    /// An allowlist entry.
    Allowlist,
    /// A safe-bin invocation with no file arguments.
    SafeBin,
    /// A trusted skill binary.
    SkillBin,
}

/// Per-segment outcome of an allowlist evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentVerdict {
    /// Chain part the segment belongs to.
    pub chain_index: usize,
    /// Position inside its pipeline.
    pub pipeline_index: usize,
    /// Resolved executable path, or the raw token.
    pub executable: String,
    /// `None` when nothing covered the segment.
    pub satisfied_by: Option<SatisfiedBy>,
}

/// Outcome of evaluating a [`CommandAnalysis`](crate::model::CommandAnalysis)
/// against the allowlist.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecAllowlistEvaluation {
    /// True only if every segment of every chain part was covered.
    pub allowlist_satisfied: bool,
    /// Entries that matched, in segment order.
    pub matches: Vec<AllowlistEntry>,
    /// One verdict per segment.
    pub verdicts: Vec<SegmentVerdict>,
}

/// Final gate decision for an exec request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecDecision {
    /// Run the command.
    Allow,
    /// Prompt the user before running.
    Ask,
    /// Refuse the command.
    Deny,
}

/// Fluent builder for [`ExecApprovalsConfig`].
#[derive(Debug, Clone, Default)]
pub struct ExecApprovalsBuilder {
    config: ExecApprovalsConfig,
}

impl ExecApprovalsBuilder {
    /// Builder starting from the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gate mode.
    #[must_use]
    pub fn security(mut self, security: ExecSecurity) -> Self {
        self.config.security = security;
        self
    }

    /// Set when to ask.
    #[must_use]
    pub fn ask(mut self, ask: ExecAsk) -> Self {
        self.config.ask = ask;
        self
    }

    /// Add an allowlist pattern.
    #[must_use]
    pub fn allow(mut self, pattern: impl Into<String>) -> Self {
        self.config.allowlist.push(AllowlistEntry::new(pattern));
        self
    }

    /// Replace the safe-bin set.
    #[must_use]
    pub fn safe_bins(mut self, bins: Vec<String>) -> Self {
        self.config.safe_bins = bins;
        self
    }

    /// Trust a skill binary and enable skill auto-allow.
    #[must_use]
    pub fn skill_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.skill_bins.push(path.into());
        self.config.auto_allow_skills = true;
        self
    }

    /// Toggle skill auto-allow.
    #[must_use]
    pub fn auto_allow_skills(mut self, enabled: bool) -> Self {
        self.config.auto_allow_skills = enabled;
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> ExecApprovalsConfig {
        self.config
    }
}
