use super::{
    OutputChunk, OutputStream, ProcessExit, RunStdin, SpawnRequest, SpawnedProcess, StdinInner,
    Utf8Decoder, OUTPUT_CHANNEL_CAPACITY, READ_BUFFER_BYTES,
};
use crate::error::{GuardError, GuardResult};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::Read;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

pub(super) fn spawn(request: &SpawnRequest) -> GuardResult<SpawnedProcess> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| GuardError::spawn("cannot spawn an empty argv", "argv is empty"))?;

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| GuardError::spawn("failed to open pty", err))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(args);
    if let Some(cwd) = &request.cwd {
        cmd.cwd(cwd);
    }
    for (key, value) in &request.env {
        cmd.env(key, value);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|err| GuardError::spawn(format!("failed to spawn {program}"), err))?;
    // The master only sees EOF once no slave handle is left open here.
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| GuardError::spawn("failed to clone pty reader", err))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|err| GuardError::spawn("failed to take pty writer", err))?;
    let pid = child.process_id();
    let mut killer = child.clone_killer();

    let (tx, output) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        let mut buf = vec![0u8; READ_BUFFER_BYTES];
        let mut decoder = Utf8Decoder::default();
        loop {
            let text = match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => decoder.decode(buf.get(..n).unwrap_or_default()),
            };
            if text.is_empty() {
                continue;
            }
            let chunk = OutputChunk {
                stream: OutputStream::Stdout,
                text,
            };
            if tx.blocking_send(chunk).is_err() {
                return;
            }
        }
        let text = decoder.finish();
        if !text.is_empty() {
            let _ = tx.blocking_send(OutputChunk {
                stream: OutputStream::Stdout,
                text,
            });
        }
    });

    let (exit_tx, exit) = oneshot::channel();
    std::thread::spawn(move || {
        let exit = child.wait().map_or_else(
            |_| ProcessExit::default(),
            |status| ProcessExit {
                exit_code: i32::try_from(status.exit_code()).ok(),
                exit_signal: None,
            },
        );
        let _ = exit_tx.send(exit);
    });

    Ok(SpawnedProcess {
        pid,
        stdin: Some(RunStdin {
            inner: StdinInner::Pty(Arc::new(Mutex::new(writer))),
        }),
        output,
        exit,
        fallback_kill: Some(Box::new(move || {
            let _ = killer.kill();
        })),
        keepalive: Some(Box::new(pair.master)),
    })
}
