//! Command analysis: turn raw shell text into resolved command segments.
//!
//! Analysis never executes anything and never fails with an error. Input it
//! cannot reason about (unmatched quotes, substitutions, redirections) yields
//! a [`CommandAnalysis`] with `ok == false`, which every caller must treat as
//! "not allowlisted".
//!
//! # Key Operations
//!
//! - [`analyze_shell_command`] - analyze a shell command string
//! - [`analyze_argv_command`] - analyze an argv that bypasses the shell

mod resolve;
mod tokenize;
mod wrappers;

pub(crate) use resolve::{has_path_separator, normalize_lexically};

use crate::model::{CommandAnalysis, CommandSegment, Platform};
use std::collections::HashMap;
use std::path::Path;
use tokenize::RawSegment;

fn build_segment(
    raw: RawSegment,
    chain_index: usize,
    pipeline_index: usize,
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
    platform: Platform,
) -> CommandSegment {
    let unwrapped = wrappers::unwrap_segment(&raw.argv);
    let resolution = unwrapped
        .effective_argv
        .first()
        .map(|token| resolve::resolve_executable(token, cwd, env, platform));
    CommandSegment {
        raw: raw.raw,
        argv: raw.argv,
        effective_argv: unwrapped.effective_argv,
        resolution,
        wrapper: unwrapped.wrapper,
        chain_index,
        pipeline_index,
    }
}

/// Analyze a shell command line.
///
/// On platforms that support chain splitting the command is split on
/// top-level `&&`, `||` and `;` into chains and on `|` into pipeline
/// segments. On Windows the whole string is one segment.
pub fn analyze_shell_command(
    command: &str,
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
    platform: Platform,
) -> CommandAnalysis {
    if command.trim().is_empty() {
        return CommandAnalysis::failed("empty command");
    }

    let split = if platform.supports_chain_splitting() {
        tokenize::split_posix(command)
    } else {
        tokenize::split_windows(command)
    };
    let raw_chains = match split {
        Ok(chains) => chains,
        Err(reason) => {
            tracing::debug!(%reason, "command analysis failed");
            return CommandAnalysis::failed(reason);
        }
    };

    let chains: Vec<Vec<CommandSegment>> = raw_chains
        .into_iter()
        .enumerate()
        .map(|(chain_index, pipeline)| {
            pipeline
                .into_iter()
                .enumerate()
                .map(|(pipeline_index, raw)| {
                    build_segment(raw, chain_index, pipeline_index, cwd, env, platform)
                })
                .collect()
        })
        .collect();

    let segments: Vec<CommandSegment> = chains.iter().flatten().cloned().collect();
    if segments.is_empty() {
        return CommandAnalysis::failed("empty command");
    }
    tracing::debug!(
        segments = segments.len(),
        chains = chains.len(),
        "command analyzed"
    );

    CommandAnalysis {
        ok: true,
        reason: None,
        segments,
        chains: (chains.len() > 1).then_some(chains),
    }
}

/// Analyze an argv that is executed directly, without a shell.
pub fn analyze_argv_command(
    argv: &[String],
    cwd: Option<&Path>,
    env: Option<&HashMap<String, String>>,
    platform: Platform,
) -> CommandAnalysis {
    if argv.first().map_or(true, |first| first.trim().is_empty()) {
        return CommandAnalysis::failed("empty argv");
    }
    let raw = RawSegment {
        raw: argv.join(" "),
        argv: argv.to_vec(),
    };
    CommandAnalysis {
        ok: true,
        reason: None,
        segments: vec![build_segment(raw, 0, 0, cwd, env, platform)],
        chains: None,
    }
}
