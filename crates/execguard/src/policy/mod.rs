//! Exec approval policy.
//!
//! Decides whether an analyzed command may run without asking. Every segment
//! of every chain must be covered independently, by an allowlist entry, a
//! safe-bin invocation, or a trusted skill binary. Any uncovered segment
//! fails the whole command.
//!
//! # Key Operations
//!
//! - [`evaluate_exec_allowlist`] - check an analysis against the allowlist
//! - [`evaluate_shell_allowlist`] - analyze and check a shell command in one call
//! - [`decide_exec`] - combine security mode, ask mode and the evaluation

mod allowlist;
mod safe_bins;

pub use allowlist::match_allowlist;
pub use safe_bins::is_safe_bin_usage;

use crate::analysis::{analyze_shell_command, normalize_lexically};
use crate::model::{
    AllowlistEntry, CommandAnalysis, CommandSegment, ExecAllowlistEvaluation, ExecApprovalsConfig,
    ExecAsk, ExecDecision, ExecSecurity, ExecutableResolution, Platform, SatisfiedBy, SegmentVerdict,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Inputs for an allowlist evaluation.
#[derive(Clone, Debug)]
pub struct AllowlistContext<'a> {
    /// Configured allowlist entries.
    pub allowlist: &'a [AllowlistEntry],
    /// Safe-bin names.
    pub safe_bins: &'a [String],
    /// Directory relative executables resolve against.
    pub cwd: Option<&'a Path>,
    /// Environment supplying `PATH`; the process environment when `None`.
    pub env: Option<&'a HashMap<String, String>>,
    /// Canonical paths of trusted skill binaries.
    pub skill_bins: &'a [PathBuf],
    /// Let `skill_bins` through without an allowlist entry.
    pub auto_allow_skills: bool,
    /// Agent scope used to filter scoped allowlist entries.
    pub scope: Option<&'a str>,
    /// Platform whose path and quoting rules apply.
    pub platform: Platform,
}

impl<'a> AllowlistContext<'a> {
    /// Context taking its lists from `config` for the current platform.
    #[must_use]
    pub fn from_config(config: &'a ExecApprovalsConfig, cwd: Option<&'a Path>) -> Self {
        Self {
            allowlist: &config.allowlist,
            safe_bins: &config.safe_bins,
            cwd,
            env: None,
            skill_bins: &config.skill_bins,
            auto_allow_skills: config.auto_allow_skills,
            scope: None,
            platform: Platform::current(),
        }
    }

    /// Filter scoped entries to `scope`.
    #[must_use]
    pub fn with_scope(mut self, scope: Option<&'a str>) -> Self {
        self.scope = scope;
        self
    }

    /// Resolve `PATH` from `env` instead of the process environment.
    #[must_use]
    pub fn with_env(mut self, env: Option<&'a HashMap<String, String>>) -> Self {
        self.env = env;
        self
    }

    /// Analyze and match with another platform's rules.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }
}

/// Analysis and evaluation of a shell command.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellAllowlistEvaluation {
    /// How the command was split and resolved.
    pub analysis: CommandAnalysis,
    /// Which segments the allowlist covered.
    pub evaluation: ExecAllowlistEvaluation,
}

fn same_path(a: &Path, b: &Path, platform: Platform) -> bool {
    if platform.case_insensitive_paths() {
        a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
    } else {
        a == b
    }
}

fn is_trusted_skill_bin(resolution: &ExecutableResolution, ctx: &AllowlistContext<'_>) -> bool {
    if !ctx.auto_allow_skills {
        return false;
    }
    let Some(canonical) = resolution.canonical_path.as_deref() else {
        return false;
    };
    ctx.skill_bins.iter().any(|bin| {
        let trusted = std::fs::canonicalize(bin).unwrap_or_else(|_| normalize_lexically(bin));
        same_path(&trusted, canonical, ctx.platform)
    })
}

fn evaluate_segment<'e>(
    segment: &CommandSegment,
    ctx: &AllowlistContext<'e>,
) -> (Option<SatisfiedBy>, Option<&'e AllowlistEntry>) {
    if segment.is_unsafe_wrapper() {
        return (None, None);
    }
    let Some(resolution) = segment.resolution.as_ref() else {
        return (None, None);
    };
    if let Some(entry) = match_allowlist(ctx.allowlist, resolution, ctx.platform, ctx.scope) {
        return (Some(SatisfiedBy::Allowlist), Some(entry));
    }
    if is_safe_bin_usage(segment, ctx.safe_bins, ctx.cwd, ctx.platform) {
        return (Some(SatisfiedBy::SafeBin), None);
    }
    if is_trusted_skill_bin(resolution, ctx) {
        return (Some(SatisfiedBy::SkillBin), None);
    }
    (None, None)
}

/// Evaluate every segment of `analysis` against the allowlist.
///
/// A failed analysis or an empty segment list is never satisfied.
#[must_use]
pub fn evaluate_exec_allowlist(
    analysis: &CommandAnalysis,
    ctx: &AllowlistContext<'_>,
) -> ExecAllowlistEvaluation {
    if !analysis.ok || analysis.segments.is_empty() {
        return ExecAllowlistEvaluation::default();
    }

    let mut matches = Vec::new();
    let mut verdicts = Vec::with_capacity(analysis.segments.len());
    for segment in &analysis.segments {
        let (satisfied_by, entry) = evaluate_segment(segment, ctx);
        if let Some(entry) = entry {
            matches.push(entry.clone());
        }
        let executable = segment.resolution.as_ref().map_or_else(
            || segment.argv.first().cloned().unwrap_or_default(),
            |r| r.executable_name.clone(),
        );
        verdicts.push(SegmentVerdict {
            chain_index: segment.chain_index,
            pipeline_index: segment.pipeline_index,
            executable,
            satisfied_by,
        });
    }

    let allowlist_satisfied = verdicts.iter().all(|v| v.satisfied_by.is_some());
    tracing::debug!(
        segments = verdicts.len(),
        allowlist_satisfied,
        "allowlist evaluated"
    );
    ExecAllowlistEvaluation {
        allowlist_satisfied,
        matches,
        verdicts,
    }
}

/// Analyze `command` and evaluate it with the context's cwd, env and platform.
#[must_use]
pub fn evaluate_shell_allowlist(command: &str, ctx: &AllowlistContext<'_>) -> ShellAllowlistEvaluation {
    let analysis = analyze_shell_command(command, ctx.cwd, ctx.env, ctx.platform);
    let evaluation = evaluate_exec_allowlist(&analysis, ctx);
    ShellAllowlistEvaluation { analysis, evaluation }
}

/// Whether the user must approve the command before it runs.
#[must_use]
pub fn requires_exec_approval(
    security: ExecSecurity,
    ask: ExecAsk,
    analysis_ok: bool,
    allowlist_satisfied: bool,
) -> bool {
    match ask {
        ExecAsk::Always => true,
        ExecAsk::Off => false,
        ExecAsk::OnMiss => security == ExecSecurity::Allowlist && !(analysis_ok && allowlist_satisfied),
    }
}

/// Final gate for an exec request.
///
/// With `ask = off` an allowlist miss is denied outright instead of prompting.
#[must_use]
pub fn decide_exec(
    config: &ExecApprovalsConfig,
    analysis: &CommandAnalysis,
    evaluation: &ExecAllowlistEvaluation,
) -> ExecDecision {
    let covered = analysis.ok && evaluation.allowlist_satisfied;
    let decision = match config.security {
        ExecSecurity::Deny => ExecDecision::Deny,
        ExecSecurity::Full => {
            if config.ask == ExecAsk::Always {
                ExecDecision::Ask
            } else {
                ExecDecision::Allow
            }
        }
        ExecSecurity::Allowlist => {
            if requires_exec_approval(config.security, config.ask, analysis.ok, evaluation.allowlist_satisfied) {
                ExecDecision::Ask
            } else if covered {
                ExecDecision::Allow
            } else {
                ExecDecision::Deny
            }
        }
    };
    tracing::debug!(?decision, security = ?config.security, ask = ?config.ask, "exec decision");
    decision
}

/// Stamp usage metadata on the entry matching `matched` (same pattern and scope).
///
/// Returns `false` when no such entry exists.
pub fn record_allowlist_use(
    entries: &mut [AllowlistEntry],
    matched: &AllowlistEntry,
    command: &str,
    resolved_path: Option<&Path>,
    now_ms: u64,
) -> bool {
    let Some(entry) = entries
        .iter_mut()
        .find(|e| e.pattern == matched.pattern && e.scope == matched.scope)
    else {
        return false;
    };
    entry.last_used_at_ms = Some(now_ms);
    entry.last_used_command = Some(command.to_string());
    entry.last_resolved_path = resolved_path.map(|p| p.to_string_lossy().into_owned());
    true
}

/// Append an unscoped pattern unless an identical one already exists.
///
/// Blank patterns are ignored. Returns `true` if the list changed.
pub fn add_allowlist_entry(entries: &mut Vec<AllowlistEntry>, pattern: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty()
        || entries
            .iter()
            .any(|e| e.scope.is_none() && e.pattern.trim() == pattern)
    {
        return false;
    }
    entries.push(AllowlistEntry::new(pattern));
    true
}
