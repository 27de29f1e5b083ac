//! End-to-end relay scenarios: real processes, mock CLIs, short backoffs.

use std::sync::Arc;
use std::time::Duration;

use claude_relay::cli::{ProcessLimits, SpawnError};
use claude_relay::relay::{
    Attempt, AttemptError, AttemptOutcome, CliAttemptRunner, RelayError, RetryCoordinator,
    RetryPolicy,
};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use crate::mock::{wait_until_gone, MockCli};

const FAST_DELAYS: [Duration; 3] = [
    Duration::from_millis(10),
    Duration::from_millis(20),
    Duration::from_millis(40),
];

fn coordinator_for(mock: &MockCli, limits: ProcessLimits) -> RetryCoordinator {
    let runner = CliAttemptRunner::new(mock.command(""), limits);
    let policy = RetryPolicy::new(3, FAST_DELAYS.to_vec()).unwrap();
    RetryCoordinator::new(Arc::new(runner), policy).with_request_timeout(Duration::from_secs(20))
}

fn quick_limits() -> ProcessLimits {
    ProcessLimits {
        timeout: Duration::from_secs(5),
        kill_grace: Duration::from_millis(500),
        ..ProcessLimits::default()
    }
}

#[tokio::test]
async fn hello_yields_hi_in_one_attempt() {
    let mock = MockCli::replying(r#"{"type":"result","is_error":false,"result":"hi"}"#);
    let coordinator = coordinator_for(&mock, quick_limits());

    let report = coordinator.run("hello", &CancellationToken::new()).await;

    assert_eq!(report.attempt_count(), 1);
    assert_eq!(mock.invocations(), 1);
    assert_eq!(assert_ok!(report.into_completion()), "hi");
}

#[tokio::test]
async fn overloaded_twice_then_success() {
    let mock = MockCli::overloaded_then(2, r#"{"completion":"ok"}"#);
    let coordinator = coordinator_for(&mock, quick_limits());

    let report = coordinator.run("hello", &CancellationToken::new()).await;

    assert_eq!(mock.invocations(), 3);
    let delays: Vec<Duration> = report.attempts.iter().map(Attempt::delay).collect();
    assert_eq!(delays, vec![Duration::ZERO, FAST_DELAYS[0], FAST_DELAYS[1]]);
    assert!(matches!(
        report.attempts[0].outcome(),
        AttemptOutcome::TransientError(_)
    ));
    assert!(report.attempts[2].outcome().is_success());
    assert_eq!(assert_ok!(report.into_completion()), "ok");
}

#[tokio::test]
async fn persistent_overload_exhausts_retries() {
    let mock = MockCli::overloaded_then(100, "{}");
    let coordinator = coordinator_for(&mock, quick_limits());

    let report = coordinator.run("hello", &CancellationToken::new()).await;

    assert_eq!(mock.invocations(), 4);
    assert_eq!(report.attempt_count(), 4);
    let err = assert_err!(report.result);
    assert!(err.is_overloaded());
    assert!(matches!(err, RelayError::ServiceOverloaded { attempts: 4, .. }));
}

#[tokio::test]
async fn overload_reported_in_json_is_retried() {
    let mock = MockCli::new(
        r#"if [ "$n" -le 1 ]; then
  echo '{"type":"result","is_error":true,"result":"API Error: Overloaded"}'
  exit 0
fi
echo '{"type":"result","is_error":false,"result":"second time"}'"#,
    );
    let coordinator = coordinator_for(&mock, quick_limits());

    let completion = coordinator
        .relay("hello", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(completion, "second time");
    assert_eq!(mock.invocations(), 2);
}

#[tokio::test]
async fn non_overload_failure_is_not_retried() {
    let mock = MockCli::new("echo 'Invalid API key' >&2\nexit 1");
    let coordinator = coordinator_for(&mock, quick_limits());

    let report = coordinator.run("hello", &CancellationToken::new()).await;

    assert_eq!(mock.invocations(), 1);
    match assert_err!(report.result) {
        RelayError::Fatal {
            attempt: 0,
            source: AttemptError::NonZeroExit { code, detail },
        } => {
            assert_eq!(code, Some(1));
            assert_eq!(detail, "Invalid API key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn timeout_kills_and_is_not_retried() {
    let mock = MockCli::stubborn();
    let coordinator = coordinator_for(
        &mock,
        ProcessLimits {
            timeout: Duration::from_millis(200),
            kill_grace: Duration::from_millis(200),
            ..ProcessLimits::default()
        },
    );

    let report = coordinator.run("hello", &CancellationToken::new()).await;

    assert_eq!(mock.invocations(), 1);
    assert_eq!(report.attempt_count(), 1);
    assert_eq!(report.attempts[0].outcome(), &AttemptOutcome::TimedOut);
    assert!(report.elapsed < Duration::from_secs(5));
    assert!(matches!(
        report.result,
        Err(RelayError::Fatal {
            source: AttemptError::TimedOut(_),
            ..
        })
    ));
}

#[tokio::test]
async fn raw_text_is_a_degraded_success() {
    let mock = MockCli::new("echo 'I am not JSON'");
    let coordinator = coordinator_for(&mock, quick_limits());

    let completion = coordinator
        .relay("hello", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion, "I am not JSON");
}

#[tokio::test]
async fn empty_output_is_fatal() {
    let mock = MockCli::new("exit 0");
    let coordinator = coordinator_for(&mock, quick_limits());

    let report = coordinator.run("hello", &CancellationToken::new()).await;

    assert_eq!(mock.invocations(), 1);
    assert!(matches!(
        report.result,
        Err(RelayError::Fatal {
            source: AttemptError::EmptyOutput,
            ..
        })
    ));
}

#[tokio::test]
async fn missing_binary_is_fatal() {
    let runner = CliAttemptRunner::new(
        claude_relay::cli::ClaudeCommand::new("").binary("/nonexistent/claude"),
        quick_limits(),
    );
    let coordinator = RetryCoordinator::new(Arc::new(runner), RetryPolicy::default());

    let report = coordinator.run("hello", &CancellationToken::new()).await;

    assert_eq!(report.attempt_count(), 1);
    assert!(matches!(
        report.result,
        Err(RelayError::Fatal {
            source: AttemptError::Spawn(SpawnError::NotFound(_)),
            ..
        })
    ));
}

#[tokio::test]
async fn request_deadline_kills_in_flight_attempt() {
    let mock = MockCli::new("echo $$ > \"$dir/pid\"\nsleep 30");
    let coordinator =
        coordinator_for(&mock, quick_limits()).with_request_timeout(Duration::from_millis(300));

    let report = coordinator.run("hello", &CancellationToken::new()).await;

    assert!(matches!(report.result, Err(RelayError::DeadlineExceeded(_))));
    assert_eq!(report.attempt_count(), 1);
    assert!(report.elapsed < Duration::from_secs(3));

    let pid: i32 = mock.read("pid").trim().parse().unwrap();
    assert!(wait_until_gone(pid).await, "attempt process {pid} survived");
}

#[tokio::test]
async fn prompt_reaches_cli_unchanged() {
    let mock = MockCli::new(r#"printf '%s' "$2" > "$dir/prompt.txt"
echo '{"result":"received"}'"#);
    let coordinator = coordinator_for(&mock, quick_limits());
    let prompt = "'; rm -rf / #\n\"$(whoami)\" `date` \\ $PATH";

    let completion = coordinator
        .relay(prompt, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(completion, "received");
    assert_eq!(mock.read("prompt.txt"), prompt);
}
