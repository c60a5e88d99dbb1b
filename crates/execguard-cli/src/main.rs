//! execguard CLI: command allowlist checks, sandbox validation and supervised runs.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes
#![allow(clippy::fn_params_excessive_bools)] // CLI flags are naturally bools

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use execguard::analysis::analyze_shell_command;
use execguard::config::{load_config_file, GuardConfig};
use execguard::error::GuardError;
use execguard::policy::{decide_exec, evaluate_exec_allowlist, AllowlistContext};
use execguard::process::{ProcessSupervisor, SpawnInput, SpawnMode};
use execguard::sandbox::validate_sandbox_security;
use execguard::{CommandAnalysis, ExecDecision, Platform, RunExit, TerminationReason};
use miette::{IntoDiagnostic, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Exit code when the command needs interactive approval.
const EXIT_ASK: i32 = 2;
/// Exit code when the command is refused.
const EXIT_DENY: i32 = 3;
/// Exit code for a run ended by either timeout, as coreutils `timeout` does.
const EXIT_TIMEOUT: i32 = 124;
/// Exit code for a run cancelled with Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(name = "execguard", version, about = "Execution safety control plane")]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Log decisions to stderr (overridden by EXECGUARD_LOG)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse a shell command into resolved segments
    Analyze {
        #[arg(long)]
        json: bool,
        #[arg(long, help = "Directory relative paths resolve against")]
        cwd: Option<PathBuf>,
        #[arg(long, help = "Analyze as if on this platform (linux, macos, windows)")]
        platform: Option<String>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Decide whether a shell command may run: exit 0 allow, 2 ask, 3 deny
    Check {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long, help = "Agent scope used to select scoped allowlist entries")]
        scope: Option<String>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Validate binds, network mode and isolation profiles of a sandbox config
    ValidateSandbox {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        config: PathBuf,
    },
    /// Run a command under supervision
    Run {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(long, help = "Kill the run after this many milliseconds")]
        timeout_ms: Option<u64>,
        #[arg(long, help = "Kill the run after this many milliseconds without output")]
        no_output_timeout_ms: Option<u64>,
        #[arg(long, help = "Attach the process to a pseudo-terminal")]
        pty: bool,
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) -> bool {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            std::env::var_os("NO_COLOR").is_none()
                && supports_color::on(supports_color::Stream::Stderr).is_some()
        }
    };
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
    use_color
}

fn init_tracing(verbose: bool, ansi: bool) {
    let filter = EnvFilter::try_from_env("EXECGUARD_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(ansi)
        .with_target(false)
        .try_init()
        .ok();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ansi = configure_colors(cli.color);
    init_tracing(cli.verbose, ansi);
    match cli.command {
        Commands::Analyze {
            json,
            cwd,
            platform,
            command,
        } => cmd_analyze(json, cwd, platform, &command),
        Commands::Check {
            json,
            config,
            cwd,
            scope,
            command,
        } => cmd_check(json, &config, cwd, scope.as_deref(), &command),
        Commands::ValidateSandbox { json, config } => cmd_validate_sandbox(json, &config),
        Commands::Run {
            json,
            config,
            cwd,
            timeout_ms,
            no_output_timeout_ms,
            pty,
            argv,
        } => {
            let input = SpawnInput {
                cwd,
                timeout_ms,
                no_output_timeout_ms,
                mode: if pty { SpawnMode::Pty } else { SpawnMode::Child },
                ..SpawnInput::new(argv)
            };
            cmd_run(json, config.as_deref(), input)
        }
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

fn resolve_cwd(cwd: Option<PathBuf>) -> Result<PathBuf> {
    match cwd {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().into_diagnostic(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string(value).into_diagnostic()?;
    println!("{payload}");
    Ok(())
}

fn print_analysis(analysis: &CommandAnalysis) {
    if !analysis.ok {
        println!(
            "analysis: failed ({})",
            analysis.reason.as_deref().unwrap_or("unknown")
        );
        return;
    }
    println!("analysis: ok");
    for segment in &analysis.segments {
        let resolved = segment
            .resolution
            .as_ref()
            .and_then(|r| r.resolved_path.as_ref())
            .map_or_else(|| "<unresolved>".to_string(), |p| p.display().to_string());
        let wrapper = segment
            .wrapper
            .as_ref()
            .map(|w| format!(" via {} ({:?})", w.name, w.disposition))
            .unwrap_or_default();
        println!(
            "  [{}.{}] {} -> {resolved}{wrapper}",
            segment.chain_index, segment.pipeline_index, segment.raw
        );
    }
}

fn cmd_analyze(json: bool, cwd: Option<PathBuf>, platform: Option<String>, command: &[String]) -> Result<()> {
    let platform = match platform {
        Some(name) => name.parse::<Platform>().map_err(|err| miette::miette!("{err}"))?,
        None => Platform::current(),
    };
    let cwd = resolve_cwd(cwd)?;
    let analysis = analyze_shell_command(&command.join(" "), Some(&cwd), None, platform);
    if json {
        print_json(&analysis)?;
    } else {
        print_analysis(&analysis);
    }
    Ok(())
}

/// Load a config file, reporting failures with their own exit code.
fn load_config(json: bool, path: &Path) -> Result<GuardConfig> {
    match load_config_file(path) {
        Ok(config) => Ok(config),
        Err(err) => emit_error(json, &err),
    }
}

fn cmd_check(json: bool, config: &Path, cwd: Option<PathBuf>, scope: Option<&str>, command: &[String]) -> Result<()> {
    let config = load_config(json, config)?;
    let cwd = resolve_cwd(cwd)?;
    let ctx = AllowlistContext::from_config(&config.exec, Some(&cwd)).with_scope(scope);
    let analysis = analyze_shell_command(&command.join(" "), ctx.cwd, ctx.env, ctx.platform);
    let evaluation = evaluate_exec_allowlist(&analysis, &ctx);
    let decision = decide_exec(&config.exec, &analysis, &evaluation);

    if json {
        print_json(&serde_json::json!({
            "decision": decision,
            "analysis": analysis,
            "evaluation": evaluation,
        }))?;
    } else {
        for verdict in &evaluation.verdicts {
            let by = verdict
                .satisfied_by
                .map_or_else(|| "not allowed".to_string(), |s| format!("{s:?}"));
            eprintln!("  {}: {by}", verdict.executable);
        }
        println!("decision: {decision:?}");
    }
    match decision {
        ExecDecision::Allow => Ok(()),
        ExecDecision::Ask => std::process::exit(EXIT_ASK),
        ExecDecision::Deny => std::process::exit(EXIT_DENY),
    }
}

fn cmd_validate_sandbox(json: bool, config: &Path) -> Result<()> {
    let config = load_config(json, config)?;
    match validate_sandbox_security(&config.sandbox) {
        Ok(binds) => {
            if json {
                print_json(&serde_json::json!({ "ok": true, "binds": binds }))?;
            } else {
                println!("sandbox: ok ({} bind mounts)", binds.len());
            }
            Ok(())
        }
        Err(err) => emit_error(json, &err),
    }
}

fn emit_error<T>(json: bool, err: &GuardError) -> Result<T> {
    if json {
        print_json(&err.to_error_info())?;
    } else {
        eprintln!("error: {err}");
        if let Some(rule) = err.rule {
            eprintln!("  rule: {rule}");
        }
        if let Some(fix) = err.context.as_ref().and_then(|ctx| ctx.get("fix")).and_then(|fix| fix.as_str()) {
            eprintln!("  help: {fix}");
        }
    }
    std::process::exit(err.code.exit_code());
}

fn exit_code_for_run(exit: &RunExit) -> i32 {
    match exit.reason {
        TerminationReason::OverallTimeout | TerminationReason::NoOutputTimeout => EXIT_TIMEOUT,
        TerminationReason::ManualCancel => EXIT_CANCELLED,
        TerminationReason::Exit | TerminationReason::Signal | TerminationReason::SpawnError => {
            exit.exit_code.unwrap_or(1)
        }
    }
}

fn cmd_run(json: bool, config: Option<&Path>, input: SpawnInput) -> Result<()> {
    let config = match config {
        Some(path) => load_config(json, path)?,
        None => GuardConfig::default(),
    };
    // Stream output live unless the caller wants one JSON document.
    let input = if json {
        input
    } else {
        input
            .capture_output(false)
            .on_stdout(|text| {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes()).ok();
                out.flush().ok();
            })
            .on_stderr(|text| {
                let mut err = io::stderr().lock();
                err.write_all(text.as_bytes()).ok();
            })
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;
    let supervisor = ProcessSupervisor::new(config.supervisor);
    let exit = runtime.block_on(async {
        let run = supervisor.spawn(input).await?;
        let handler_supervisor = supervisor.clone();
        let run_id = run.run_id();
        if let Err(err) = ctrlc::set_handler(move || {
            handler_supervisor.cancel(run_id, TerminationReason::ManualCancel);
        }) {
            tracing::warn!(error = %err, "could not install Ctrl-C handler");
        }
        run.wait().await
    });
    let exit = match exit {
        Ok(exit) => exit,
        Err(err) => return emit_error(json, &err),
    };

    if json {
        print_json(&exit)?;
    } else if exit.reason != TerminationReason::Exit {
        eprintln!("run ended: {} after {}ms", exit.reason, exit.duration_ms);
    }
    let code = exit_code_for_run(&exit);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}
