//! Tests for supervised Claude process runs against mock CLIs.

use std::time::Duration;

use claude_relay::cli::{
    ClaudeCommand, ExtractedValue, KillState, ProcessLimits, ProcessOutcome, ProcessSupervisor,
    SpawnError,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::mock::{wait_until_gone, MockCli};

fn limits(timeout_ms: u64, grace_ms: u64) -> ProcessLimits {
    ProcessLimits {
        timeout: Duration::from_millis(timeout_ms),
        kill_grace: Duration::from_millis(grace_ms),
        ..ProcessLimits::default()
    }
}

fn pid_of(report_pid: Option<u32>) -> i32 {
    i32::try_from(report_pid.expect("process had a pid")).expect("pid fits in i32")
}

#[tokio::test]
async fn run_collects_json_output() {
    let mock = MockCli::replying(r#"{"type":"result","result":"hi"}"#);
    let supervisor = ProcessSupervisor::new(limits(5_000, 1_000));

    let report = supervisor
        .run(&mock.command("hello"), &CancellationToken::new())
        .await;

    assert_eq!(report.final_state, Some(KillState::Exited));
    assert!(!report.escalation.terminate_sent);
    match report.outcome {
        ProcessOutcome::Completed(done) => {
            assert_eq!(
                done.value,
                ExtractedValue::Json(json!({"type": "result", "result": "hi"}))
            );
            assert!(!done.output.truncated);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn exit_status_and_stderr_are_reported() {
    let mock = MockCli::new("echo 'partial' \necho 'bad flag' >&2\nexit 3");
    let supervisor = ProcessSupervisor::new(limits(5_000, 1_000));

    let report = supervisor
        .run(&mock.command("hello"), &CancellationToken::new())
        .await;

    match report.outcome {
        ProcessOutcome::Completed(done) => {
            assert_eq!(done.exit_code, Some(3));
            assert!(!done.success);
            assert_eq!(done.output.stderr_text().trim(), "bad flag");
            assert_eq!(done.value, ExtractedValue::Raw("partial".to_string()));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn prompt_arrives_byte_exact() {
    let mock = MockCli::new(r#"printf '%s' "$2" > "$dir/prompt.txt"
echo '{"result":"ok"}'"#);
    let prompt = "say \"hi\" $(touch pwned) `id` $HOME; echo 'x'\nnext line\ttab";
    let supervisor = ProcessSupervisor::new(limits(5_000, 1_000));

    let report = supervisor
        .run(&mock.command(prompt), &CancellationToken::new())
        .await;

    assert!(matches!(report.outcome, ProcessOutcome::Completed(_)));
    assert_eq!(mock.read("prompt.txt"), prompt);
    assert!(!mock.dir().join("pwned").exists());
}

#[tokio::test]
async fn resolution_stops_lingering_process() {
    let mock = MockCli::new("echo '{\"result\":\"fast\"}'\nsleep 30");
    let supervisor = ProcessSupervisor::new(limits(10_000, 1_000));

    let report = supervisor
        .run(&mock.command("hello"), &CancellationToken::new())
        .await;

    assert!(report.elapsed < Duration::from_secs(5));
    assert!(report.escalation.terminate_sent);
    match report.outcome {
        ProcessOutcome::Completed(done) => {
            assert!(done.terminated_early);
            assert_eq!(done.value, ExtractedValue::Json(json!({"result": "fast"})));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn timeout_terminates_cooperative_process() {
    let mock = MockCli::new("sleep 30");
    let supervisor = ProcessSupervisor::new(limits(200, 2_000));

    let report = supervisor
        .run(&mock.command("hello"), &CancellationToken::new())
        .await;

    assert!(matches!(report.outcome, ProcessOutcome::TimedOut(_)));
    assert!(report.escalation.terminate_sent);
    assert!(!report.escalation.kill_sent);
    assert_ne!(report.final_state, Some(KillState::Running));
    assert!(wait_until_gone(pid_of(report.pid)).await);
}

#[tokio::test]
async fn timeout_escalates_to_kill_when_terminate_is_ignored() {
    let mock = MockCli::stubborn();
    let supervisor = ProcessSupervisor::new(limits(300, 300));

    let report = supervisor
        .run(&mock.command("hello"), &CancellationToken::new())
        .await;

    assert!(matches!(report.outcome, ProcessOutcome::TimedOut(_)));
    assert!(report.escalation.terminate_sent);
    assert!(report.escalation.kill_sent);
    assert_ne!(report.final_state, Some(KillState::Running));
    assert!(report.elapsed >= Duration::from_millis(600));
    assert!(report.elapsed < Duration::from_secs(5));
    assert!(wait_until_gone(pid_of(report.pid)).await);
}

#[tokio::test]
async fn output_written_during_grace_window_is_captured() {
    let mock = MockCli::new(
        "trap 'head -c 300000 /dev/zero; exit 0' TERM\nsleep 30 &\nwait $!\nsleep 30",
    );
    let supervisor = ProcessSupervisor::new(limits(300, 3_000));

    let report = supervisor
        .run(&mock.command("hello"), &CancellationToken::new())
        .await;

    assert!(report.escalation.terminate_sent);
    assert!(!report.escalation.kill_sent, "flush on terminate was killed");
    assert!(report.elapsed < Duration::from_secs(3));
    match report.outcome {
        ProcessOutcome::TimedOut(output) => {
            assert_eq!(output.stdout.len(), 300_000);
            assert!(!output.truncated);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn background_children_do_not_outlive_the_run() {
    let mock = MockCli::new("sleep 30 &\necho $! > \"$dir/child.pid\"\necho '{\"result\":\"x\"}'");
    let supervisor = ProcessSupervisor::new(ProcessLimits {
        terminate_on_resolve: false,
        ..limits(5_000, 1_000)
    });

    let report = supervisor
        .run(&mock.command("hello"), &CancellationToken::new())
        .await;

    assert!(matches!(report.outcome, ProcessOutcome::Completed(_)));
    assert!(report.elapsed < Duration::from_secs(5));
    let child: i32 = mock.read("child.pid").trim().parse().unwrap();
    assert!(wait_until_gone(child).await, "background sleep {child} survived");
}

#[tokio::test]
async fn output_is_capped() {
    let mock = MockCli::new("head -c 100000 /dev/zero | tr '\\0' 'a'");
    let supervisor = ProcessSupervisor::new(ProcessLimits {
        max_output_bytes: 1024,
        ..limits(5_000, 1_000)
    });

    let report = supervisor
        .run(&mock.command("hello"), &CancellationToken::new())
        .await;

    match report.outcome {
        ProcessOutcome::Completed(done) => {
            assert!(done.success);
            assert!(done.output.truncated);
            assert_eq!(done.output.stdout.len(), 1024);
            assert_eq!(done.value, ExtractedValue::Raw("a".repeat(1024)));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_terminates_process() {
    let mock = MockCli::new("sleep 30");
    let supervisor = ProcessSupervisor::new(limits(30_000, 1_000));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let report = supervisor.run(&mock.command("hello"), &cancel).await;

    assert!(matches!(report.outcome, ProcessOutcome::Cancelled(_)));
    assert!(report.escalation.terminate_sent);
    assert!(report.elapsed < Duration::from_secs(5));
    assert!(wait_until_gone(pid_of(report.pid)).await);
}

#[tokio::test]
async fn missing_binary_is_spawn_failure() {
    let supervisor = ProcessSupervisor::default();
    let command = ClaudeCommand::new("hello").binary("/nonexistent/claude-relay-test");

    let report = supervisor.run(&command, &CancellationToken::new()).await;

    assert!(report.pid.is_none());
    assert!(report.final_state.is_none());
    assert!(matches!(
        report.outcome,
        ProcessOutcome::SpawnFailed(SpawnError::NotFound(_))
    ));
}
