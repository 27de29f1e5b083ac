//! Retry loop that turns one prompt into one completion.
//!
//! Attempts run strictly one after another. Before attempt `i > 0` the
//! coordinator sleeps for the `i`-th backoff delay. Overloads are retried,
//! everything else stops the loop. A request-level deadline bounds the whole
//! loop: when it fires mid-attempt the attempt is cancelled through the
//! process supervisor's kill path and no further attempts are made.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::{
    map_completion, Attempt, AttemptError, AttemptOutcome, AttemptRunner, ErrorClass,
    PendingAttempt, RelayError, RetryPolicy,
};
use crate::cli::ExtractedValue;

/// Default bound on total latency for one request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(35);

/// Result of one relay request with its attempt history.
#[derive(Debug)]
pub struct RelayReport {
    pub attempts: Vec<Attempt>,
    pub elapsed: Duration,
    pub result: Result<ExtractedValue, RelayError>,
}

impl RelayReport {
    /// Number of attempts made.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// Sum of the backoff delays slept between attempts.
    #[must_use]
    pub fn total_delay(&self) -> Duration {
        self.attempts.iter().map(Attempt::delay).sum()
    }

    /// Map the winning value to its completion string.
    ///
    /// # Errors
    ///
    /// Returns the request's `RelayError` if no attempt succeeded.
    pub fn into_completion(self) -> Result<String, RelayError> {
        self.result.map(|value| map_completion(&value))
    }
}

/// Drives attempts for a request under a [`RetryPolicy`].
#[derive(Clone)]
pub struct RetryCoordinator {
    runner: Arc<dyn AttemptRunner>,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl RetryCoordinator {
    /// Create a coordinator with the default request timeout.
    #[must_use]
    pub fn new(runner: Arc<dyn AttemptRunner>, policy: RetryPolicy) -> Self {
        Self {
            runner,
            policy,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the request-level deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Relay `prompt` and return its completion string.
    ///
    /// # Errors
    ///
    /// Returns `RelayError` when no attempt succeeded.
    pub async fn relay(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, RelayError> {
        self.run(prompt, cancel).await.into_completion()
    }

    /// Relay `prompt` and return the full report.
    pub async fn run(&self, prompt: &str, cancel: &CancellationToken) -> RelayReport {
        let span = tracing::info_span!(
            "relay",
            request_id = %Uuid::new_v4(),
            prompt_len = prompt.len()
        );

        async {
            let started = Instant::now();
            let deadline = started + self.request_timeout;
            let mut attempts = Vec::new();

            let result = self.drive(prompt, cancel, deadline, &mut attempts).await;
            let elapsed = started.elapsed();

            match &result {
                Ok(_) => tracing::info!(
                    attempts = attempts.len(),
                    elapsed_ms = millis(elapsed),
                    "Relay succeeded"
                ),
                Err(e) => tracing::warn!(
                    attempts = attempts.len(),
                    elapsed_ms = millis(elapsed),
                    error = %e,
                    "Relay failed"
                ),
            }

            RelayReport {
                attempts,
                elapsed,
                result,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        deadline: Instant,
        attempts: &mut Vec<Attempt>,
    ) -> Result<ExtractedValue, RelayError> {
        let max_attempts = self.policy.max_attempts();
        let mut index = 0;

        loop {
            let delay = self.policy.delay_before(index);
            if !delay.is_zero() {
                tracing::info!(
                    attempt = index,
                    max_retries = self.policy.max_retries(),
                    delay_ms = millis(delay),
                    "Retrying after transient failure"
                );
                tokio::select! {
                    biased;

                    () = cancel.cancelled() => return Err(RelayError::Cancelled),
                    () = sleep_until(deadline) => {
                        return Err(RelayError::DeadlineExceeded(self.request_timeout));
                    }
                    () = sleep(delay) => {}
                }
            }

            let pending = PendingAttempt::start(index, delay);
            tracing::debug!(attempt = index, "Starting attempt");

            let attempt_cancel = cancel.child_token();
            let run = self.runner.run_attempt(prompt, &attempt_cancel);
            tokio::pin!(run);

            let mut deadline_hit = false;
            let result = tokio::select! {
                biased;

                result = &mut run => result,
                () = sleep_until(deadline) => {
                    tracing::warn!(attempt = index, "Request deadline reached, cancelling attempt");
                    deadline_hit = true;
                    attempt_cancel.cancel();
                    run.await
                }
            };

            let err = match result {
                Ok(value) => {
                    attempts.push(pending.finish(AttemptOutcome::Success(value.clone())));
                    return Ok(value);
                }
                Err(err) => err,
            };

            if deadline_hit {
                attempts.push(pending.finish(AttemptOutcome::Cancelled));
                return Err(RelayError::DeadlineExceeded(self.request_timeout));
            }
            if matches!(err, AttemptError::Cancelled) {
                attempts.push(pending.finish(AttemptOutcome::Cancelled));
                return Err(RelayError::Cancelled);
            }

            let class = self.policy.classify(&err);
            attempts.push(pending.finish(AttemptOutcome::from_error(&err, class)));

            match class {
                ErrorClass::Fatal => {
                    tracing::error!(attempt = index, error = %err, "Attempt failed fatally");
                    return Err(RelayError::Fatal {
                        attempt: index,
                        source: err,
                    });
                }
                ErrorClass::Transient if index + 1 < max_attempts => {
                    tracing::warn!(attempt = index, error = %err, "Attempt failed transiently");
                    index += 1;
                }
                ErrorClass::Transient => {
                    tracing::warn!(attempts = max_attempts, error = %err, "Retries exhausted");
                    return Err(if err.is_overloaded() {
                        RelayError::ServiceOverloaded {
                            attempts: max_attempts,
                            last_error: err.to_string(),
                        }
                    } else {
                        RelayError::RetriesExhausted {
                            attempts: max_attempts,
                            source: err,
                        }
                    });
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("policy", &self.policy)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
