//! Single-attempt execution against the Claude CLI.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{map_completion, mentions_overload, AttemptError};
use crate::cli::{
    ClaudeCommand, CompletedProcess, ExtractedValue, ProcessLimits, ProcessOutcome,
    ProcessSupervisor,
};

/// Runs one attempt for a prompt.
///
/// Implementations must honour `cancel` by stopping promptly and returning
/// [`AttemptError::Cancelled`].
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    async fn run_attempt(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractedValue, AttemptError>;
}

/// Attempt runner that spawns the Claude CLI under a [`ProcessSupervisor`].
#[derive(Debug, Clone)]
pub struct CliAttemptRunner {
    template: ClaudeCommand,
    supervisor: ProcessSupervisor,
}

impl CliAttemptRunner {
    /// Create a runner from a command template; its prompt is replaced per attempt.
    #[must_use]
    pub fn new(template: ClaudeCommand, limits: ProcessLimits) -> Self {
        Self {
            template,
            supervisor: ProcessSupervisor::new(limits),
        }
    }

    #[must_use]
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }
}

#[async_trait]
impl AttemptRunner for CliAttemptRunner {
    async fn run_attempt(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractedValue, AttemptError> {
        let command = self.template.with_prompt(prompt);
        let report = self.supervisor.run(&command, cancel).await;

        tracing::debug!(
            pid = ?report.pid,
            final_state = ?report.final_state,
            terminate_sent = report.escalation.terminate_sent,
            kill_sent = report.escalation.kill_sent,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "Attempt process finished"
        );

        match report.outcome {
            ProcessOutcome::Completed(done) => interpret(done),
            ProcessOutcome::SpawnFailed(e) => Err(AttemptError::Spawn(e)),
            ProcessOutcome::TimedOut(_) => {
                Err(AttemptError::TimedOut(self.supervisor.limits().timeout))
            }
            ProcessOutcome::Cancelled(_) => Err(AttemptError::Cancelled),
            ProcessOutcome::WaitFailed(e) => Err(AttemptError::Wait(e)),
        }
    }
}

/// Decide whether a completed process produced a usable value.
pub(crate) fn interpret(done: CompletedProcess) -> Result<ExtractedValue, AttemptError> {
    if !done.terminated_early {
        let stderr = done.output.stderr_text();
        let stderr = stderr.trim();

        if !done.success {
            let detail = if stderr.is_empty() {
                done.output.stdout_text().trim().to_string()
            } else {
                stderr.to_string()
            };
            return Err(AttemptError::NonZeroExit {
                code: done.exit_code,
                detail,
            });
        }

        if mentions_overload(stderr) {
            return Err(AttemptError::Reported(stderr.to_string()));
        }
    }

    if done.value == ExtractedValue::Raw(String::new()) {
        return Err(AttemptError::EmptyOutput);
    }

    if done.value.reports_error() {
        return Err(AttemptError::Reported(map_completion(&done.value)));
    }

    Ok(done.value)
}
