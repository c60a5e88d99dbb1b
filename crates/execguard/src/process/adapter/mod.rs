//! Process adapters: the only code that creates OS processes.
//!
//! Both adapters hand back the same [`SpawnedProcess`]: a pid, an optional
//! stdin, a channel of output chunks and a one-shot exit notification. The
//! supervisor never needs to know which one it is driving.

mod child;
mod pty;

use crate::error::{GuardError, GuardResult};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Output chunks buffered between a reader and the supervisor.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const READ_BUFFER_BYTES: usize = 8 * 1024;

/// Variables that let a caller inject code into the spawned process.
const DANGEROUS_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "DYLD_FALLBACK_LIBRARY_PATH",
    "DYLD_ROOT_PATH",
    "PYTHONPATH",
    "RUBYLIB",
    "PERL5LIB",
    "NODE_OPTIONS",
    "BASH_ENV",
    "ENV",
    "IFS",
];

/// How the process is attached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpawnMode {
    /// Plain child with piped stdin, stdout and stderr.
    #[default]
    Child,
    /// Child attached to a pseudo-terminal; all output arrives as stdout.
    Pty,
}

/// Which pipe a chunk of output came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output, or the PTY.
    Stdout,
    /// Standard error.
    Stderr,
}

#[derive(Clone, Debug)]
pub(crate) struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ProcessExit {
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
}

/// Turns raw reads into text without splitting multibyte characters.
///
/// An incomplete sequence at the end of a read is held back until the next
/// read completes it. Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if let Some(valid) = self.pending.get(..valid_up_to) {
                        text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    }
                    let Some(invalid_len) = err.error_len() else {
                        self.pending.drain(..valid_up_to);
                        break;
                    };
                    text.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid_up_to + invalid_len);
                }
            }
        }
        text
    }

    /// Flush whatever is still held back once the stream has ended.
    pub(crate) fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// What an adapter needs to start a process.
#[derive(Clone, Debug)]
pub(crate) struct SpawnRequest {
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub mode: SpawnMode,
}

pub(crate) struct SpawnedProcess {
    pub pid: Option<u32>,
    pub stdin: Option<RunStdin>,
    pub output: mpsc::Receiver<OutputChunk>,
    pub exit: oneshot::Receiver<ProcessExit>,
    /// Kills the direct child when no pid is known.
    pub fallback_kill: Option<Box<dyn FnOnce() + Send>>,
    /// Held until the run is finalized so the terminal stays open.
    pub keepalive: Option<Box<dyn Send>>,
}

impl fmt::Debug for SpawnedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpawnedProcess")
            .field("pid", &self.pid)
            .field("stdin", &self.stdin.is_some())
            .finish_non_exhaustive()
    }
}

fn check_env_overrides(env: &HashMap<String, String>) -> GuardResult<()> {
    if let Some(key) = env
        .keys()
        .find(|key| DANGEROUS_ENV_VARS.iter().any(|d| d.eq_ignore_ascii_case(key)))
    {
        return Err(GuardError::policy_denied(
            format!("environment override {key} is not allowed"),
            serde_json::json!({
                "variable": key,
                "blocked_vars": DANGEROUS_ENV_VARS,
                "fix": format!("Remove {key} from the spawn environment"),
            }),
        ));
    }
    Ok(())
}

/// Start the process described by `request`.
pub(crate) fn spawn_process(request: &SpawnRequest) -> GuardResult<SpawnedProcess> {
    if request.argv.first().map_or(true, |cmd| cmd.trim().is_empty()) {
        return Err(GuardError::spawn("cannot spawn an empty argv", "argv is empty"));
    }
    check_env_overrides(&request.env)?;
    match request.mode {
        SpawnMode::Child => child::spawn(request),
        SpawnMode::Pty => pty::spawn(request),
    }
}

/// Writable stdin of a supervised run.
pub struct RunStdin {
    inner: StdinInner,
}

enum StdinInner {
    Child(tokio::process::ChildStdin),
    Pty(Arc<Mutex<Box<dyn Write + Send>>>),
}

impl fmt::Debug for RunStdin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            StdinInner::Child(_) => "child",
            StdinInner::Pty(_) => "pty",
        };
        f.debug_struct("RunStdin").field("kind", &kind).finish()
    }
}

impl RunStdin {
    /// Write `data` to the process and flush.
    pub async fn write_all(&mut self, data: &[u8]) -> GuardResult<()> {
        match &mut self.inner {
            StdinInner::Child(stdin) => {
                use tokio::io::AsyncWriteExt;
                stdin
                    .write_all(data)
                    .await
                    .map_err(|err| GuardError::io("failed to write stdin", err))?;
                stdin
                    .flush()
                    .await
                    .map_err(|err| GuardError::io("failed to flush stdin", err))
            }
            StdinInner::Pty(writer) => {
                let writer = Arc::clone(writer);
                let data = data.to_vec();
                tokio::task::spawn_blocking(move || {
                    let mut guard = writer
                        .lock()
                        .map_err(|_| GuardError::internal("pty writer lock poisoned"))?;
                    guard
                        .write_all(&data)
                        .and_then(|()| guard.flush())
                        .map_err(|err| GuardError::io("failed to write pty", err))
                })
                .await
                .map_err(|err| GuardError::internal(format!("pty write task failed: {err}")))?
            }
        }
    }

    /// Close stdin, signalling end of input to the process.
    pub fn close(self) {
        drop(self);
    }
}
