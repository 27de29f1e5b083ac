//! Relay error types.

use std::time::Duration;

use crate::cli::SpawnError;

/// Substring that marks a transient overload, matched case-insensitively.
pub const OVERLOADED_MARKER: &str = "overloaded";

/// Returns true if `text` signals a transient overload.
#[must_use]
pub fn mentions_overload(text: &str) -> bool {
    text.to_lowercase().contains(OVERLOADED_MARKER)
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Why a single attempt failed.
#[derive(thiserror::Error, Debug)]
pub enum AttemptError {
    /// The executable could not be started.
    #[error("Failed to spawn Claude CLI: {0}")]
    Spawn(#[from] SpawnError),

    /// The process exited unsuccessfully.
    #[error("Claude exited with {}: {detail}", describe_exit(*.code))]
    NonZeroExit { code: Option<i32>, detail: String },

    /// The process exited cleanly but reported an error.
    #[error("Claude reported an error: {0}")]
    Reported(String),

    /// The process exited cleanly without writing anything to stdout.
    #[error("Claude produced no output")]
    EmptyOutput,

    /// The per-attempt deadline elapsed.
    #[error("Claude did not finish within {0:?}")]
    TimedOut(Duration),

    /// The attempt was cancelled from outside.
    #[error("Attempt cancelled")]
    Cancelled,

    /// Waiting on the process failed.
    #[error("Failed to wait on Claude process: {0}")]
    Wait(#[source] std::io::Error),
}

impl AttemptError {
    /// Returns true if the CLI itself reported a transient overload.
    ///
    /// Only text produced by the process is inspected; spawn and wait
    /// failures never count, whatever their paths or messages contain.
    #[must_use]
    pub fn is_overloaded(&self) -> bool {
        match self {
            Self::NonZeroExit { detail, .. } => mentions_overload(detail),
            Self::Reported(message) => mentions_overload(message),
            _ => false,
        }
    }
}

/// Request-level failure surfaced to callers.
#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    /// Every attempt failed with an overload.
    #[error("Service overloaded after {attempts} attempts: {last_error}")]
    ServiceOverloaded { attempts: u32, last_error: String },

    /// An attempt failed in a way that is not retried.
    #[error("{source}")]
    Fatal {
        attempt: u32,
        #[source]
        source: AttemptError,
    },

    /// Retries ran out on a transient error that was not an overload.
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: AttemptError,
    },

    /// The request-level deadline elapsed.
    #[error("Request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// The request was cancelled from outside.
    #[error("Request cancelled")]
    Cancelled,
}

impl RelayError {
    /// Returns true for the overload outcome.
    #[must_use]
    pub fn is_overloaded(&self) -> bool {
        matches!(self, Self::ServiceOverloaded { .. })
    }
}
