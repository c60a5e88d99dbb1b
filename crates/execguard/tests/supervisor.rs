// Test module - relaxed lint rules
#![allow(clippy::default_trait_access)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::inefficient_to_string)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::cast_possible_truncation)]
#![allow(missing_docs)]
#![cfg(unix)]

use execguard::config::SupervisorConfig;
use execguard::error::ErrorCode;
use execguard::process::{global_supervisor, ProcessSupervisor, SpawnInput, SpawnMode};
use execguard::{RunId, RunState, TerminationReason};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn sh(script: &str) -> SpawnInput {
    SpawnInput::new(["/bin/sh", "-c", script])
}

#[tokio::test]
async fn natural_exit_reports_code_and_output() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor
        .spawn(sh("echo out; echo err >&2; exit 3"))
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::Exit);
    assert_eq!(exit.exit_code, Some(3));
    assert_eq!(exit.stdout, "out\n");
    assert_eq!(exit.stderr, "err\n");
    assert!(!exit.timed_out);
    assert!(!exit.no_output_timed_out);
    assert!(!exit.output_truncated);
}

#[tokio::test]
async fn silent_process_hits_no_output_timeout() {
    let supervisor = ProcessSupervisor::default();
    let started = Instant::now();
    let run = supervisor
        .spawn(SpawnInput::new(["sleep", "5"]).no_output_timeout_ms(300))
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::NoOutputTimeout);
    assert!(exit.no_output_timed_out);
    assert!(!exit.timed_out);
    assert_eq!(exit.exit_signal.as_deref(), Some("SIGKILL"));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn output_keeps_the_idle_timer_alive() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor
        .spawn(sh("for i in 1 2 3 4 5 6; do echo $i; sleep 0.1; done").no_output_timeout_ms(500))
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::Exit);
    assert_eq!(exit.exit_code, Some(0));
    assert_eq!(exit.stdout.lines().count(), 6);
}

#[tokio::test]
async fn chatty_process_hits_overall_timeout() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor
        .spawn(
            sh("while true; do echo tick; sleep 0.05; done")
                .timeout_ms(400)
                .no_output_timeout_ms(10_000),
        )
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::OverallTimeout);
    assert!(exit.timed_out);
    assert!(exit.stdout.contains("tick"));
    assert!(exit.duration_ms >= 400);
}

#[tokio::test]
async fn manual_cancel_terminates_gracefully() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor.spawn(SpawnInput::new(["sleep", "30"])).await.unwrap();
    assert!(run.pid().is_some());
    assert!(run.cancel(TerminationReason::ManualCancel));
    assert!(!run.cancel(TerminationReason::OverallTimeout));
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::ManualCancel);
    assert_eq!(exit.exit_signal.as_deref(), Some("SIGTERM"));
}

#[tokio::test]
async fn cancel_after_settle_changes_nothing() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor.spawn(sh("echo done")).await.unwrap();
    let first = run.wait().await.unwrap();
    assert!(run.is_settled());
    assert!(!run.cancel(TerminationReason::ManualCancel));
    assert!(!supervisor.cancel(run.run_id(), TerminationReason::ManualCancel));
    let second = run.wait().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.reason, TerminationReason::Exit);
}

#[tokio::test]
async fn replacing_a_scope_settles_previous_runs_first() {
    let supervisor = ProcessSupervisor::default();
    let first = supervisor
        .spawn(SpawnInput::new(["sleep", "30"]).scope("agent:main", false))
        .await
        .unwrap();
    let second = supervisor
        .spawn(sh("echo replaced").scope("agent:main", true))
        .await
        .unwrap();
    assert!(first.is_settled());
    assert_eq!(first.wait().await.unwrap().reason, TerminationReason::ManualCancel);
    assert_eq!(second.wait().await.unwrap().stdout, "replaced\n");
}

#[tokio::test]
async fn cancel_scope_signals_every_active_run() {
    let supervisor = ProcessSupervisor::default();
    let a = supervisor
        .spawn(SpawnInput::new(["sleep", "30"]).scope("batch", false))
        .await
        .unwrap();
    let b = supervisor
        .spawn(SpawnInput::new(["sleep", "30"]).scope("batch", false))
        .await
        .unwrap();
    let other = supervisor
        .spawn(SpawnInput::new(["sleep", "30"]).scope("other", false))
        .await
        .unwrap();
    assert_eq!(supervisor.cancel_scope("batch", TerminationReason::ManualCancel), 2);
    assert_eq!(a.wait().await.unwrap().reason, TerminationReason::ManualCancel);
    assert_eq!(b.wait().await.unwrap().reason, TerminationReason::ManualCancel);
    assert!(!other.is_settled());
    other.cancel(TerminationReason::ManualCancel);
    other.wait().await.unwrap();
}

#[tokio::test]
async fn spawn_failure_is_recorded_as_spawn_error() {
    let supervisor = ProcessSupervisor::default();
    let run_id = RunId::new();
    let input = SpawnInput {
        run_id: Some(run_id),
        ..SpawnInput::new(["/nonexistent/execguard-binary"])
    };
    let err = supervisor.spawn(input).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Spawn);
    let record = supervisor.get_record(run_id).unwrap();
    assert_eq!(record.state, RunState::Exited);
    assert_eq!(record.termination_reason, Some(TerminationReason::SpawnError));
    assert!(supervisor.list_active().is_empty());
}

#[tokio::test]
async fn injection_env_vars_are_refused() {
    let supervisor = ProcessSupervisor::default();
    let run_id = RunId::new();
    let input = SpawnInput {
        run_id: Some(run_id),
        ..sh("true").env("LD_PRELOAD", "/tmp/evil.so")
    };
    let err = supervisor.spawn(input).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PolicyDenied);
    assert!(err.message.contains("LD_PRELOAD"));
    assert_eq!(
        supervisor.get_record(run_id).unwrap().termination_reason,
        Some(TerminationReason::SpawnError)
    );

    let run = supervisor
        .spawn(sh("printf %s \"$GREETING\"").env("GREETING", "hi"))
        .await
        .unwrap();
    assert_eq!(run.wait().await.unwrap().stdout, "hi");
}

#[tokio::test]
async fn duplicate_run_ids_are_rejected() {
    let supervisor = ProcessSupervisor::default();
    let run_id = RunId::new();
    let run = supervisor
        .spawn(SpawnInput {
            run_id: Some(run_id),
            ..SpawnInput::new(["sleep", "30"])
        })
        .await
        .unwrap();
    let err = supervisor
        .spawn(SpawnInput {
            run_id: Some(run_id),
            ..sh("true")
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
    run.cancel(TerminationReason::ManualCancel);
    run.wait().await.unwrap();
}

#[tokio::test]
async fn capture_stops_at_the_output_budget() {
    let config = SupervisorConfig {
        max_output_bytes: 16,
        ..SupervisorConfig::default()
    };
    let supervisor = ProcessSupervisor::new(config);
    let run = supervisor
        .spawn(sh("printf '%s' 0123456789abcdefghijklmnop"))
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.stdout, "0123456789abcdef");
    assert!(exit.output_truncated);
    assert_eq!(exit.reason, TerminationReason::Exit);
}

#[tokio::test]
async fn callbacks_stream_output_without_capture() {
    let supervisor = ProcessSupervisor::default();
    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);
    let run = supervisor
        .spawn(
            sh("echo one; echo two >&2")
                .capture_output(false)
                .on_stdout(move |text| sink.lock().unwrap().push_str(text)),
        )
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert!(exit.stdout.is_empty());
    assert!(exit.stderr.is_empty());
    assert_eq!(*seen.lock().unwrap(), "one\n");
}

#[tokio::test]
async fn stdin_is_forwarded_to_the_process() {
    let supervisor = ProcessSupervisor::default();
    let mut run = supervisor.spawn(SpawnInput::new(["cat"])).await.unwrap();
    let mut stdin = run.take_stdin().unwrap();
    stdin.write_all(b"hello\n").await.unwrap();
    stdin.close();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.stdout, "hello\n");
    assert_eq!(exit.exit_code, Some(0));
}

#[tokio::test]
async fn records_follow_the_run_lifecycle() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor
        .spawn(SpawnInput::new(["sleep", "30"]).session("session-1", "local"))
        .await
        .unwrap();
    let active = supervisor.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].run_id, run.run_id());
    assert_eq!(active[0].state, RunState::Running);
    assert_eq!(active[0].pid, run.pid());
    assert_eq!(active[0].session_id, "session-1");

    assert!(supervisor.cancel(run.run_id(), TerminationReason::ManualCancel));
    run.wait().await.unwrap();
    let record = supervisor.get_record(run.run_id()).unwrap();
    assert_eq!(record.state, RunState::Exited);
    assert_eq!(record.termination_reason, Some(TerminationReason::ManualCancel));
    assert_eq!(record.exit_signal.as_deref(), Some("SIGTERM"));
    assert!(record.updated_at_ms >= record.created_at_ms);
    assert!(supervisor.list_active().is_empty());
}

#[tokio::test]
async fn exited_records_are_bounded() {
    let config = SupervisorConfig {
        max_exited_records: 2,
        ..SupervisorConfig::default()
    };
    let supervisor = ProcessSupervisor::new(config);
    let mut ids = Vec::new();
    for _ in 0..3 {
        let run = supervisor.spawn(sh("true")).await.unwrap();
        run.wait().await.unwrap();
        ids.push(run.run_id());
    }
    assert!(supervisor.get_record(ids[0]).is_none());
    assert!(supervisor.get_record(ids[1]).is_some());
    assert!(supervisor.get_record(ids[2]).is_some());
}

#[tokio::test]
async fn pty_runs_merge_output_into_stdout() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor
        .spawn(sh("echo from-pty; echo also >&2").mode(SpawnMode::Pty).timeout_ms(10_000))
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::Exit);
    assert_eq!(exit.exit_code, Some(0));
    assert!(exit.stdout.contains("from-pty"));
    assert!(exit.stdout.contains("also"));
    assert!(exit.stderr.is_empty());
}

#[tokio::test]
async fn empty_argv_is_a_spawn_error() {
    let supervisor = ProcessSupervisor::default();
    let err = supervisor.spawn(SpawnInput::new(Vec::<String>::new())).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Spawn);
}

#[test]
fn global_supervisor_is_shared() {
    assert!(std::ptr::eq(global_supervisor(), global_supervisor()));
}

#[tokio::test]
async fn concurrent_scope_replacements_leave_one_live_run() {
    let supervisor = ProcessSupervisor::default();
    let first = supervisor
        .spawn(SpawnInput::new(["sleep", "30"]).scope("lane", false))
        .await
        .unwrap();
    let (a, b) = tokio::join!(
        supervisor.spawn(SpawnInput::new(["sleep", "30"]).scope("lane", true)),
        supervisor.spawn(SpawnInput::new(["sleep", "30"]).scope("lane", true)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let live: Vec<_> = supervisor
        .list_active()
        .into_iter()
        .filter(|r| r.scope_key.as_deref() == Some("lane") && r.termination_reason.is_none())
        .collect();
    assert_eq!(live.len(), 1, "{live:?}");
    assert!(first.is_settled());
    assert!(a.is_settled() != b.is_settled());

    supervisor.cancel_scope("lane", TerminationReason::ManualCancel);
    a.wait().await.unwrap();
    b.wait().await.unwrap();
}

#[tokio::test]
async fn no_output_timeout_fires_on_schedule() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor
        .spawn(SpawnInput::new(["sleep", "5"]).no_output_timeout_ms(1_000))
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::NoOutputTimeout);
    assert!((1_000..=1_100).contains(&exit.duration_ms), "{}ms", exit.duration_ms);
}

#[tokio::test]
async fn overall_timeout_fires_on_schedule() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor
        .spawn(SpawnInput::new(["sleep", "5"]).timeout_ms(500))
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::OverallTimeout);
    assert!((500..=700).contains(&exit.duration_ms), "{}ms", exit.duration_ms);
}

#[tokio::test]
async fn pty_no_output_timeout_fires_on_schedule() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor
        .spawn(
            SpawnInput::new(["sleep", "5"])
                .mode(SpawnMode::Pty)
                .no_output_timeout_ms(1_000),
        )
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.reason, TerminationReason::NoOutputTimeout);
    assert!((1_000..=1_100).contains(&exit.duration_ms), "{}ms", exit.duration_ms);
}

#[tokio::test]
async fn multibyte_characters_survive_read_boundaries() {
    let supervisor = ProcessSupervisor::default();
    // 8191 spaces put the two bytes of 'é' on either side of the 8 KiB read.
    let script = r"printf '%8191s\303\251\n' ''";
    let streamed = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&streamed);
    let run = supervisor
        .spawn(sh(script).on_stdout(move |text| sink.lock().unwrap().push_str(text)))
        .await
        .unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.stdout.len(), 8_194);
    assert!(exit.stdout.ends_with("é\n"));
    assert!(!exit.stdout.contains(char::REPLACEMENT_CHARACTER));
    assert_eq!(*streamed.lock().unwrap(), exit.stdout);
}

#[tokio::test]
async fn invalid_bytes_are_replaced_without_dropping_text() {
    let supervisor = ProcessSupervisor::default();
    let run = supervisor.spawn(sh(r"printf 'a\377b\303'")).await.unwrap();
    let exit = run.wait().await.unwrap();
    assert_eq!(exit.stdout, "a\u{FFFD}b\u{FFFD}");
}
