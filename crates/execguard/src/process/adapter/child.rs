use super::{
    OutputChunk, OutputStream, ProcessExit, RunStdin, SpawnRequest, SpawnedProcess, StdinInner,
    Utf8Decoder, OUTPUT_CHANNEL_CAPACITY, READ_BUFFER_BYTES,
};
use crate::error::{GuardError, GuardResult};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    #[cfg(unix)]
    let exit_signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|raw| {
            nix::sys::signal::Signal::try_from(raw).map_or_else(|_| raw.to_string(), |sig| sig.as_str().to_string())
        })
    };
    #[cfg(not(unix))]
    let exit_signal = None;
    ProcessExit {
        exit_code: status.code(),
        exit_signal,
    }
}

fn forward<R>(mut reader: R, stream: OutputStream, tx: mpsc::Sender<OutputChunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_BYTES];
        let mut decoder = Utf8Decoder::default();
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = decoder.decode(buf.get(..n).unwrap_or_default());
                    if text.is_empty() {
                        continue;
                    }
                    if tx.send(OutputChunk { stream, text }).await.is_err() {
                        return;
                    }
                }
            }
        }
        let text = decoder.finish();
        if !text.is_empty() {
            let _ = tx.send(OutputChunk { stream, text }).await;
        }
    });
}

pub(super) fn spawn(request: &SpawnRequest) -> GuardResult<SpawnedProcess> {
    let (program, args) = request
        .argv
        .split_first()
        .ok_or_else(|| GuardError::spawn("cannot spawn an empty argv", "argv is empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(&request.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &request.cwd {
        cmd.current_dir(cwd);
    }
    // Own process group so the whole tree can be signalled at once.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd
        .spawn()
        .map_err(|err| GuardError::spawn(format!("failed to spawn {program}"), err))?;
    let pid = child.id();

    let (tx, output) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        forward(stdout, OutputStream::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward(stderr, OutputStream::Stderr, tx);
    }
    let stdin = child.stdin.take().map(|stdin| RunStdin {
        inner: StdinInner::Child(stdin),
    });

    let (exit_tx, exit) = oneshot::channel();
    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            Ok(()) = kill_rx => {
                let _ = child.start_kill();
                child.wait().await
            }
        };
        let exit = status.map_or_else(|_| ProcessExit::default(), exit_from_status);
        let _ = exit_tx.send(exit);
    });

    Ok(SpawnedProcess {
        pid,
        stdin,
        output,
        exit,
        fallback_kill: Some(Box::new(move || {
            let _ = kill_tx.send(());
        })),
        keepalive: None,
    })
}
