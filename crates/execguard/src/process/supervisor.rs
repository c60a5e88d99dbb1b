//! Run lifecycle, timeouts and scope replacement.

use super::adapter::{
    spawn_process, OutputChunk, OutputStream, ProcessExit, RunStdin, SpawnMode, SpawnRequest, SpawnedProcess,
};
use super::registry::{now_ms, RunRegistry};
use super::terminator::{clamp_grace, default_terminator, ProcessTreeTerminator};
use crate::config::SupervisorConfig;
use crate::error::{GuardError, GuardResult};
use crate::model::{RunExit, RunId, RunRecord, RunState, TerminationReason};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex, Notify};
use tokio::time::Instant;

/// Time allowed for readers to deliver buffered output after the process exits.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Callback receiving each decoded chunk of output.
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything needed to start a supervised run.
#[derive(Clone, Default)]
pub struct SpawnInput {
    /// Generated when not supplied.
    pub run_id: Option<RunId>,
    /// Owning session.
    pub session_id: String,
    /// Backend that requested the run.
    pub backend_id: String,
    /// Groups runs for replacement and [`ProcessSupervisor::cancel_scope`].
    pub scope_key: Option<String>,
    /// Cancel live runs sharing `scope_key` and wait for them before spawning.
    pub replace_existing_scope: bool,
    /// Plain child or PTY.
    pub mode: SpawnMode,
    /// Program and arguments; never passed through a shell.
    pub argv: Vec<String>,
    /// Working directory; inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Added to the inherited environment.
    pub env: HashMap<String, String>,
    /// Overall limit; `None` runs until exit.
    pub timeout_ms: Option<u64>,
    /// Limit on silence between output chunks; reset by every chunk.
    pub no_output_timeout_ms: Option<u64>,
    /// Keep stdout and stderr for [`RunExit`].
    pub capture_output: bool,
    /// Receives stdout as it arrives.
    pub on_stdout: Option<OutputCallback>,
    /// Receives stderr as it arrives.
    pub on_stderr: Option<OutputCallback>,
}

impl fmt::Debug for SpawnInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnInput")
            .field("run_id", &self.run_id)
            .field("session_id", &self.session_id)
            .field("scope_key", &self.scope_key)
            .field("replace_existing_scope", &self.replace_existing_scope)
            .field("mode", &self.mode)
            .field("argv", &self.argv)
            .field("timeout_ms", &self.timeout_ms)
            .field("no_output_timeout_ms", &self.no_output_timeout_ms)
            .finish_non_exhaustive()
    }
}

impl SpawnInput {
    /// Input for `argv` with output capture on.
    #[must_use]
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            capture_output: true,
            ..Self::default()
        }
    }

    /// Tag the run with its session and backend.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>, backend_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self.backend_id = backend_id.into();
        self
    }

    /// Set the scope, optionally replacing live runs in it.
    #[must_use]
    pub fn scope(mut self, scope_key: impl Into<String>, replace_existing: bool) -> Self {
        self.scope_key = Some(scope_key.into());
        self.replace_existing_scope = replace_existing;
        self
    }

    /// Pick child or PTY mode.
    #[must_use]
    pub fn mode(mut self, mode: SpawnMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Add one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the overall timeout.
    #[must_use]
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set the no-output timeout.
    #[must_use]
    pub fn no_output_timeout_ms(mut self, ms: u64) -> Self {
        self.no_output_timeout_ms = Some(ms);
        self
    }

    /// Toggle output capture.
    #[must_use]
    pub fn capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Stream stdout to `callback` as it arrives.
    #[must_use]
    pub fn on_stdout(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stdout = Some(Arc::new(callback));
        self
    }

    /// Stream stderr to `callback` as it arrives.
    #[must_use]
    pub fn on_stderr(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stderr = Some(Arc::new(callback));
        self
    }
}

/// Per-run control block shared by the handle, the supervisor and the run task.
#[derive(Debug)]
struct RunControl {
    forced: Mutex<Option<TerminationReason>>,
    kill: Notify,
    exit_tx: watch::Sender<Option<RunExit>>,
}

impl RunControl {
    fn new() -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            forced: Mutex::new(None),
            kill: Notify::new(),
            exit_tx,
        }
    }

    fn is_settled(&self) -> bool {
        self.exit_tx.borrow().is_some()
    }

    fn forced(&self) -> Option<TerminationReason> {
        *self.forced.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First write wins; returns `false` if a reason was already set or the run settled.
    fn request(&self, reason: TerminationReason) -> bool {
        if self.is_settled() {
            return false;
        }
        let mut forced = self.forced.lock().unwrap_or_else(PoisonError::into_inner);
        if forced.is_some() {
            return false;
        }
        *forced = Some(reason);
        true
    }

    /// Publish the outcome once. Later calls are ignored.
    fn settle(&self, exit: RunExit) -> bool {
        self.exit_tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(exit);
            true
        })
    }
}

#[derive(Debug)]
struct SupervisorState {
    registry: RunRegistry,
    controls: HashMap<RunId, Arc<RunControl>>,
}

#[derive(Debug)]
struct SupervisorInner {
    config: SupervisorConfig,
    terminator: Arc<dyn ProcessTreeTerminator>,
    state: Mutex<SupervisorState>,
    /// One lock per scope being replaced; replacing spawns queue on it.
    scope_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SupervisorInner {
    fn state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scope_lock(&self, scope_key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.scope_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(scope_key.to_string()).or_default())
    }

    fn release_scope_lock(&self, scope_key: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self.scope_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and `lock` are the only holders: nobody is queued behind us.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(scope_key);
        }
    }

    fn cancel(&self, run_id: RunId, reason: TerminationReason) -> bool {
        let mut state = self.state();
        let Some(control) = state.controls.get(&run_id).cloned() else {
            return false;
        };
        if !control.request(reason) {
            return false;
        }
        state.registry.mark_exiting(run_id, reason, now_ms());
        drop(state);
        tracing::debug!(%run_id, %reason, "run cancel requested");
        control.kill.notify_one();
        true
    }

    fn finalize(&self, run_id: RunId, exit: &RunExit) {
        let mut state = self.state();
        state.controls.remove(&run_id);
        let record = state.registry.finalize(
            run_id,
            exit.reason,
            exit.exit_code,
            exit.exit_signal.clone(),
            now_ms(),
        );
        drop(state);
        if record.is_some() {
            tracing::info!(
                %run_id,
                reason = %exit.reason,
                exit_code = ?exit.exit_code,
                duration_ms = exit.duration_ms,
                "run finalized"
            );
        }
    }
}

/// Spawns and supervises child and PTY processes.
///
/// Each instance owns its own registry; tests build independent instances
/// and hosts share [`global_supervisor`].
#[derive(Clone, Debug)]
pub struct ProcessSupervisor {
    inner: Arc<SupervisorInner>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl ProcessSupervisor {
    /// Supervisor using the platform's tree terminator.
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_terminator(config, default_terminator())
    }

    /// Supervisor with an explicit terminator, for tests and custom hosts.
    #[must_use]
    pub fn with_terminator(config: SupervisorConfig, terminator: Arc<dyn ProcessTreeTerminator>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                terminator,
                state: Mutex::new(SupervisorState {
                    registry: RunRegistry::new(config.max_exited_records),
                    controls: HashMap::new(),
                }),
                scope_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a run and return its handle as soon as the process exists.
    ///
    /// With `replace_existing_scope`, concurrent spawns into the same scope
    /// are serialized so at most one of them is left running.
    /// A spawn failure is recorded as a finalized `spawn-error` run before
    /// the error is returned.
    pub async fn spawn(&self, input: SpawnInput) -> GuardResult<ManagedRun> {
        let replaced_scope = input.scope_key.clone().filter(|_| input.replace_existing_scope);
        let Some(scope_key) = replaced_scope else {
            return self.start(input);
        };
        let lock = self.inner.scope_lock(&scope_key);
        let guard = lock.lock().await;
        self.replace_scope(&scope_key).await;
        let started = self.start(input);
        drop(guard);
        self.inner.release_scope_lock(&scope_key, lock);
        started
    }

    fn start(&self, input: SpawnInput) -> GuardResult<ManagedRun> {
        let run_id = input.run_id.unwrap_or_default();
        let control = self.register(run_id, &input)?;
        let request = SpawnRequest {
            argv: input.argv.clone(),
            cwd: input.cwd.clone(),
            env: input.env.clone(),
            mode: input.mode,
        };
        let mut process = match spawn_process(&request) {
            Ok(process) => process,
            Err(err) => {
                tracing::warn!(%run_id, error = %err, "spawn failed");
                let exit = RunExit {
                    reason: TerminationReason::SpawnError,
                    exit_code: None,
                    exit_signal: None,
                    duration_ms: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: false,
                    no_output_timed_out: false,
                    output_truncated: false,
                };
                self.inner.finalize(run_id, &exit);
                control.settle(exit);
                return Err(err);
            }
        };

        {
            let mut state = self.inner.state();
            state.registry.set_pid(run_id, process.pid);
            state.registry.update_state(run_id, RunState::Running, now_ms());
        }
        tracing::info!(%run_id, pid = ?process.pid, mode = ?input.mode, "run spawned");

        let pid = process.pid;
        let stdin = process.stdin.take();
        let exit_rx = control.exit_tx.subscribe();
        let task = RunTask::new(Arc::clone(&self.inner), Arc::clone(&control), run_id, process, &input);
        tokio::spawn(task.run());

        Ok(ManagedRun {
            run_id,
            pid,
            stdin,
            exit_rx,
            inner: Arc::clone(&self.inner),
        })
    }

    fn register(&self, run_id: RunId, input: &SpawnInput) -> GuardResult<Arc<RunControl>> {
        let mut state = self.inner.state();
        if state.registry.get(run_id).is_some() {
            return Err(GuardError::internal(format!("run id {run_id} already in use")));
        }
        let now = now_ms();
        state.registry.add(RunRecord {
            run_id,
            session_id: input.session_id.clone(),
            backend_id: input.backend_id.clone(),
            scope_key: input.scope_key.clone(),
            state: RunState::Starting,
            pid: None,
            created_at_ms: now,
            started_at_ms: now,
            last_output_at_ms: now,
            updated_at_ms: now,
            termination_reason: None,
            exit_code: None,
            exit_signal: None,
        });
        let control = Arc::new(RunControl::new());
        state.controls.insert(run_id, Arc::clone(&control));
        Ok(control)
    }

    async fn replace_scope(&self, scope_key: &str) {
        let previous: Vec<(RunId, Arc<RunControl>)> = {
            let state = self.inner.state();
            state
                .registry
                .active_in_scope(scope_key)
                .into_iter()
                .filter_map(|id| state.controls.get(&id).map(|c| (id, Arc::clone(c))))
                .collect()
        };
        for (run_id, control) in previous {
            self.inner.cancel(run_id, TerminationReason::ManualCancel);
            let mut rx = control.exit_tx.subscribe();
            let _ = rx.wait_for(Option::is_some).await;
        }
    }

    /// Request termination of one run. Does not wait for the process to exit.
    ///
    /// A no-op when the run is unknown, settled or already being terminated.
    pub fn cancel(&self, run_id: RunId, reason: TerminationReason) -> bool {
        self.inner.cancel(run_id, reason)
    }

    /// Request termination of every active run in `scope_key`. Returns how many were signalled.
    pub fn cancel_scope(&self, scope_key: &str, reason: TerminationReason) -> usize {
        let ids = self.inner.state().registry.active_in_scope(scope_key);
        ids.into_iter()
            .filter(|id| self.inner.cancel(*id, reason))
            .count()
    }

    /// Active or recently finalized record for `run_id`.
    #[must_use]
    pub fn get_record(&self, run_id: RunId) -> Option<RunRecord> {
        self.inner.state().registry.get(run_id)
    }

    /// Runs not yet exited, oldest first.
    #[must_use]
    pub fn list_active(&self) -> Vec<RunRecord> {
        self.inner.state().registry.list_active()
    }
}

/// Process-wide supervisor for hosts that want a single shared instance.
pub fn global_supervisor() -> &'static ProcessSupervisor {
    static GLOBAL: OnceLock<ProcessSupervisor> = OnceLock::new();
    GLOBAL.get_or_init(ProcessSupervisor::default)
}

/// Caller-facing handle to a supervised run.
pub struct ManagedRun {
    run_id: RunId,
    pid: Option<u32>,
    stdin: Option<RunStdin>,
    exit_rx: watch::Receiver<Option<RunExit>>,
    inner: Arc<SupervisorInner>,
}

impl fmt::Debug for ManagedRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedRun")
            .field("run_id", &self.run_id)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl ManagedRun {
    /// Identifier of this run.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// OS pid of the process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Stdin of the process, if still held.
    pub fn stdin(&mut self) -> Option<&mut RunStdin> {
        self.stdin.as_mut()
    }

    /// Take ownership of stdin, e.g. to close it.
    pub fn take_stdin(&mut self) -> Option<RunStdin> {
        self.stdin.take()
    }

    /// Request termination with `reason`. Returns `false` if nothing changed.
    pub fn cancel(&self, reason: TerminationReason) -> bool {
        self.inner.cancel(self.run_id, reason)
    }

    /// Whether the run has finalized.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait for the run to settle. Every call returns the same outcome.
    pub async fn wait(&self) -> GuardResult<RunExit> {
        let mut rx = self.exit_rx.clone();
        let settled = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| GuardError::internal("run task ended without reporting an exit"))?;
        (*settled)
            .clone()
            .ok_or_else(|| GuardError::internal("run settled without an exit"))
    }
}

/// Output captured for [`RunExit`], bounded by a byte budget.
#[derive(Debug, Default)]
struct Capture {
    stdout: String,
    stderr: String,
    budget: usize,
    truncated: bool,
}

impl Capture {
    fn push(&mut self, stream: OutputStream, text: &str) {
        let remaining = self.budget.saturating_sub(self.stdout.len() + self.stderr.len());
        let mut take = text.len().min(remaining);
        while !text.is_char_boundary(take) {
            take -= 1;
        }
        if take < text.len() {
            self.truncated = true;
        }
        let target = match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        };
        target.push_str(text.get(..take).unwrap_or_default());
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct RunTask {
    inner: Arc<SupervisorInner>,
    control: Arc<RunControl>,
    run_id: RunId,
    pid: Option<u32>,
    output: mpsc::Receiver<OutputChunk>,
    exit: oneshot::Receiver<ProcessExit>,
    fallback_kill: Option<Box<dyn FnOnce() + Send>>,
    keepalive: Option<Box<dyn Send>>,
    timeout: Option<Duration>,
    no_output_timeout: Option<Duration>,
    capture: Option<Capture>,
    on_stdout: Option<OutputCallback>,
    on_stderr: Option<OutputCallback>,
}

impl RunTask {
    fn new(
        inner: Arc<SupervisorInner>,
        control: Arc<RunControl>,
        run_id: RunId,
        process: SpawnedProcess,
        input: &SpawnInput,
    ) -> Self {
        let capture = input.capture_output.then(|| Capture {
            budget: inner.config.max_output_bytes,
            ..Capture::default()
        });
        Self {
            inner,
            control,
            run_id,
            pid: process.pid,
            output: process.output,
            exit: process.exit,
            fallback_kill: process.fallback_kill,
            keepalive: process.keepalive,
            timeout: input.timeout_ms.map(Duration::from_millis),
            no_output_timeout: input.no_output_timeout_ms.map(Duration::from_millis),
            capture,
            on_stdout: input.on_stdout.clone(),
            on_stderr: input.on_stderr.clone(),
        }
    }

    async fn run(mut self) {
        let started = Instant::now();
        let overall_deadline = self.timeout.map(|t| started + t);
        let mut last_output = started;
        let mut output_open = true;

        let exit = loop {
            let armed = self.control.forced().is_none();
            let idle_deadline = self.no_output_timeout.map(|t| last_output + t);
            tokio::select! {
                exit = &mut self.exit => break exit.unwrap_or_default(),
                chunk = self.output.recv(), if output_open => match chunk {
                    Some(chunk) => {
                        last_output = Instant::now();
                        self.on_output(&chunk);
                    }
                    None => output_open = false,
                },
                () = sleep_until_opt(overall_deadline), if armed => {
                    self.force(TerminationReason::OverallTimeout);
                }
                () = sleep_until_opt(idle_deadline), if armed => {
                    self.force(TerminationReason::NoOutputTimeout);
                }
                () = self.control.kill.notified() => self.handle_cancel(),
            }
        };

        if output_open {
            self.drain_output().await;
        }
        self.finish(exit, started);
    }

    fn on_output(&mut self, chunk: &OutputChunk) {
        self.inner.state().registry.touch_output(self.run_id, now_ms());
        let callback = match chunk.stream {
            OutputStream::Stdout => self.on_stdout.as_ref(),
            OutputStream::Stderr => self.on_stderr.as_ref(),
        };
        if let Some(callback) = callback {
            callback(&chunk.text);
        }
        if let Some(capture) = self.capture.as_mut() {
            capture.push(chunk.stream, &chunk.text);
        }
    }

    async fn drain_output(&mut self) {
        let deadline = Instant::now() + OUTPUT_DRAIN_TIMEOUT;
        while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, self.output.recv()).await {
            self.on_output(&chunk);
        }
    }

    /// Timer-driven termination: record the reason and kill immediately.
    fn force(&mut self, reason: TerminationReason) {
        if !self.control.request(reason) {
            return;
        }
        tracing::debug!(run_id = %self.run_id, %reason, "run timer fired");
        self.inner.state().registry.mark_exiting(self.run_id, reason, now_ms());
        self.kill_now();
    }

    fn kill_now(&mut self) {
        if let Some(pid) = self.pid {
            if let Err(err) = self.inner.terminator.force_kill_tree(pid) {
                tracing::debug!(run_id = %self.run_id, error = %err, "tree kill failed");
            }
        }
        if let Some(kill) = self.fallback_kill.take() {
            kill();
        }
    }

    /// Cancel requested through the supervisor or the handle.
    fn handle_cancel(&mut self) {
        let graceful = self.control.forced() == Some(TerminationReason::ManualCancel)
            && self.inner.config.kill_grace_ms > 0;
        match (graceful, self.pid) {
            (true, Some(pid)) => {
                let terminator = Arc::clone(&self.inner.terminator);
                let grace = clamp_grace(Some(self.inner.config.kill_grace_ms));
                let run_id = self.run_id;
                tokio::task::spawn_blocking(move || {
                    if let Err(err) = terminator.terminate_tree(pid, grace) {
                        tracing::debug!(%run_id, error = %err, "graceful tree kill failed");
                    }
                });
            }
            _ => self.kill_now(),
        }
    }

    fn finish(mut self, exit: ProcessExit, started: Instant) {
        let forced = self.control.forced();
        let reason = forced.unwrap_or(if exit.exit_signal.is_some() {
            TerminationReason::Signal
        } else {
            TerminationReason::Exit
        });
        let capture = self.capture.take().unwrap_or_default();
        let run_exit = RunExit {
            reason,
            exit_code: exit.exit_code,
            exit_signal: exit.exit_signal,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            stdout: capture.stdout,
            stderr: capture.stderr,
            timed_out: reason == TerminationReason::OverallTimeout,
            no_output_timed_out: reason == TerminationReason::NoOutputTimeout,
            output_truncated: capture.truncated,
        };
        self.inner.finalize(self.run_id, &run_exit);
        self.control.settle(run_exit);
        drop(self.keepalive.take());
    }
}
