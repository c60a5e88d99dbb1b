//! Graceful-then-forceful termination of a whole process tree.
//!
//! POSIX signals the process group and falls back to the bare pid. Windows
//! goes through `taskkill /T`. The implementation is picked once, by
//! [`default_terminator`], and every caller holds it as a trait object.

use crate::error::{GuardError, GuardResult};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Grace window used when the caller does not pick one.
pub const DEFAULT_KILL_GRACE_MS: u64 = 3_000;
/// Upper bound on any grace window.
pub const MAX_KILL_GRACE_MS: u64 = 60_000;

/// Liveness is re-checked this often while the grace window runs.
const LIVENESS_POLL: Duration = Duration::from_millis(25);

/// Clamp a requested grace period to `0..=60s`, defaulting to 3s.
#[must_use]
pub fn clamp_grace(grace_ms: Option<u64>) -> Duration {
    Duration::from_millis(grace_ms.unwrap_or(DEFAULT_KILL_GRACE_MS).min(MAX_KILL_GRACE_MS))
}

/// How a tree termination ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Nothing was running when the request arrived.
    NotRunning,
    /// The tree exited within the grace window.
    Graceful,
    /// The tree outlived the grace window and was force-killed.
    Forced,
}

/// Kills a process and everything it started.
pub trait ProcessTreeTerminator: Send + Sync + Debug {
    /// Ask the tree rooted at `pid` to exit, force-killing it after `grace`.
    ///
    /// Blocks for at most about `grace`.
    fn terminate_tree(&self, pid: u32, grace: Duration) -> GuardResult<TerminateOutcome>;

    /// Kill the tree rooted at `pid` without a grace window.
    fn force_kill_tree(&self, pid: u32) -> GuardResult<()>;
}

fn refuse_pid(pid: u32) -> GuardResult<()> {
    // 0 and 1 would address our own group or init.
    if pid <= 1 {
        return Err(GuardError::internal(format!("refusing to signal pid {pid}")));
    }
    Ok(())
}

/// Poll `alive` until it reports false or `grace` elapses.
fn wait_for_exit(grace: Duration, mut alive: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        if !alive() {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(LIVENESS_POLL.min(deadline - now));
    }
}

#[cfg(unix)]
pub use posix::PosixTerminator;

#[cfg(unix)]
mod posix {
    use super::{refuse_pid, wait_for_exit, ProcessTreeTerminator, TerminateOutcome};
    use crate::error::{GuardError, GuardResult};
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;
    use std::time::Duration;

    /// Signals the process group, then the bare pid.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct PosixTerminator;

    fn to_pid(pid: u32) -> GuardResult<Pid> {
        refuse_pid(pid)?;
        i32::try_from(pid)
            .map(Pid::from_raw)
            .map_err(|_| GuardError::internal(format!("pid {pid} out of range")))
    }

    /// Signal the group led by `pid`, or `pid` alone when it leads no group.
    ///
    /// Returns `false` when nothing received the signal.
    fn signal_tree(pid: Pid, signal: Option<Signal>) -> GuardResult<bool> {
        match killpg(pid, signal) {
            Ok(()) => return Ok(true),
            Err(Errno::ESRCH | Errno::EPERM) => {}
            Err(err) => return Err(GuardError::io("failed to signal process group", err)),
        }
        match kill(pid, signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(err) => Err(GuardError::io("failed to signal process", err)),
        }
    }

    fn is_alive(pid: Pid) -> bool {
        signal_tree(pid, None).unwrap_or(false)
    }

    impl ProcessTreeTerminator for PosixTerminator {
        fn terminate_tree(&self, pid: u32, grace: Duration) -> GuardResult<TerminateOutcome> {
            let pid = to_pid(pid)?;
            if !signal_tree(pid, Some(Signal::SIGTERM))? {
                return Ok(TerminateOutcome::NotRunning);
            }
            if wait_for_exit(grace, || is_alive(pid)) {
                return Ok(TerminateOutcome::Graceful);
            }
            tracing::debug!(pid = pid.as_raw(), "grace period elapsed, sending SIGKILL");
            signal_tree(pid, Some(Signal::SIGKILL))?;
            Ok(TerminateOutcome::Forced)
        }

        fn force_kill_tree(&self, pid: u32) -> GuardResult<()> {
            let pid = to_pid(pid)?;
            signal_tree(pid, Some(Signal::SIGKILL)).map(|_| ())
        }
    }
}

/// The `taskkill` / `tasklist` calls the Windows terminator depends on.
pub trait TaskCommands: Send + Sync + Debug {
    /// Run `taskkill /T /PID <pid>`, adding `/F` when `force` is set.
    fn taskkill(&self, pid: u32, force: bool) -> std::io::Result<()>;

    /// Whether `pid` still shows up in `tasklist`.
    fn is_alive(&self, pid: u32) -> std::io::Result<bool>;
}

/// [`TaskCommands`] backed by the real Windows tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTaskCommands;

impl TaskCommands for SystemTaskCommands {
    fn taskkill(&self, pid: u32, force: bool) -> std::io::Result<()> {
        let pid = pid.to_string();
        let mut args = vec!["/T", "/PID", pid.as_str()];
        if force {
            args.insert(0, "/F");
        }
        // taskkill exits non-zero when the tree is already gone.
        std::process::Command::new("taskkill")
            .args(&args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|_| ())
    }

    fn is_alive(&self, pid: u32) -> std::io::Result<bool> {
        let output = std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH", "/FO", "CSV"])
            .output()?;
        let needle = format!("\"{pid}\"");
        Ok(String::from_utf8_lossy(&output.stdout).contains(&needle))
    }
}

/// Terminator driving `taskkill /T`.
#[derive(Debug, Default)]
pub struct WindowsTerminator<C: TaskCommands = SystemTaskCommands> {
    commands: C,
}

impl<C: TaskCommands> WindowsTerminator<C> {
    /// Terminator using `commands`.
    pub fn new(commands: C) -> Self {
        Self { commands }
    }
}

impl<C: TaskCommands> ProcessTreeTerminator for WindowsTerminator<C> {
    fn terminate_tree(&self, pid: u32, grace: Duration) -> GuardResult<TerminateOutcome> {
        refuse_pid(pid)?;
        if !self.commands.is_alive(pid).unwrap_or(true) {
            return Ok(TerminateOutcome::NotRunning);
        }
        self.commands
            .taskkill(pid, false)
            .map_err(|err| GuardError::io("failed to run taskkill", err))?;
        // A failed liveness check counts as alive so the forced kill still runs.
        if wait_for_exit(grace, || self.commands.is_alive(pid).unwrap_or(true)) {
            return Ok(TerminateOutcome::Graceful);
        }
        self.commands
            .taskkill(pid, true)
            .map_err(|err| GuardError::io("failed to run taskkill /F", err))?;
        Ok(TerminateOutcome::Forced)
    }

    fn force_kill_tree(&self, pid: u32) -> GuardResult<()> {
        refuse_pid(pid)?;
        self.commands
            .taskkill(pid, true)
            .map_err(|err| GuardError::io("failed to run taskkill /F", err))
    }
}

/// Terminator for the platform this binary was built for.
#[must_use]
pub fn default_terminator() -> Arc<dyn ProcessTreeTerminator> {
    #[cfg(unix)]
    {
        Arc::new(PosixTerminator)
    }
    #[cfg(not(unix))]
    {
        Arc::new(WindowsTerminator::new(SystemTaskCommands))
    }
}

/// Terminate the tree rooted at `pid` with a clamped grace period.
pub fn kill_process_tree(pid: u32, grace_ms: Option<u64>) -> GuardResult<TerminateOutcome> {
    default_terminator().terminate_tree(pid, clamp_grace(grace_ms))
}
