//! Configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::{ClaudeCommand, ProcessLimits, DEFAULT_CLAUDE_BINARY, DEFAULT_MAX_OUTPUT_BYTES};
use crate::relay::{
    CliAttemptRunner, RetryCoordinator, RetryPolicy, RetryPolicyError, DEFAULT_MAX_RETRIES,
};

use super::ConfigError;

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub cli: CliConfig,
    pub process: ProcessConfig,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    pub queue: QueueConfig,
}

/// How the Claude CLI is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Executable name or path.
    pub binary: PathBuf,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
    /// Pass `--dangerously-skip-permissions`.
    pub skip_permissions: bool,
    /// Variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_CLAUDE_BINARY),
            working_dir: None,
            skip_permissions: true,
            env: BTreeMap::new(),
        }
    }
}

/// Per-attempt process limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub timeout_ms: u64,
    pub kill_grace_ms: u64,
    pub max_output_bytes: usize,
    /// Stop the child as soon as a JSON object is resolved.
    pub terminate_on_resolve: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            kill_grace_ms: 5_000,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            terminate_on_resolve: true,
        }
    }
}

/// Retry budget and backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub delays_ms: Vec<u64>,
    pub retry_on_timeout: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delays_ms: vec![1_000, 2_000, 4_000],
            retry_on_timeout: false,
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on one `/api/claude` request, retries included.
    pub request_timeout_ms: u64,
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout_ms: 35_000,
            cors_permissive: true,
        }
    }
}

/// Message queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

impl RelayConfig {
    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "process.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.server.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "server.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue.capacity must be greater than zero".to_string(),
            ));
        }
        self.to_policy()
            .map_err(|e| ConfigError::Invalid(format!("retry: {e}")))?;
        Ok(())
    }

    /// Process limits for each attempt.
    #[must_use]
    pub fn to_limits(&self) -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_millis(self.process.timeout_ms),
            kill_grace: Duration::from_millis(self.process.kill_grace_ms),
            max_output_bytes: self.process.max_output_bytes,
            terminate_on_resolve: self.process.terminate_on_resolve,
        }
    }

    /// Build the retry policy.
    ///
    /// # Errors
    ///
    /// Returns `RetryPolicyError` if the delay sequence is shorter than `max_retries`.
    pub fn to_policy(&self) -> Result<RetryPolicy, RetryPolicyError> {
        let delays = self
            .retry
            .delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect();
        Ok(RetryPolicy::new(self.retry.max_retries, delays)?
            .retry_on_timeout(self.retry.retry_on_timeout))
    }

    /// Command template with an empty prompt.
    #[must_use]
    pub fn command_template(&self) -> ClaudeCommand {
        let mut cmd = ClaudeCommand::new(String::new())
            .binary(self.cli.binary.clone())
            .skip_permissions(self.cli.skip_permissions);

        if let Some(ref dir) = self.cli.working_dir {
            cmd = cmd.working_dir(dir.clone());
        }
        for (key, value) in &self.cli.env {
            cmd = cmd.env(key.clone(), value.clone());
        }
        cmd
    }

    /// Request-level deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    /// Coordinator driving the configured CLI.
    ///
    /// # Errors
    ///
    /// Returns `RetryPolicyError` if the retry section is inconsistent.
    pub fn coordinator(&self) -> Result<RetryCoordinator, RetryPolicyError> {
        let runner = CliAttemptRunner::new(self.command_template(), self.to_limits());
        Ok(RetryCoordinator::new(Arc::new(runner), self.to_policy()?)
            .with_request_timeout(self.request_timeout()))
    }
}
