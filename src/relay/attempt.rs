//! Record of a single relay attempt.

use std::time::Duration;

use tokio::time::Instant;

use super::{AttemptError, ErrorClass};
use crate::cli::ExtractedValue;

/// Terminal outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(ExtractedValue),
    TransientError(String),
    FatalError(String),
    TimedOut,
    Cancelled,
}

impl AttemptOutcome {
    /// Build the outcome for a failed attempt.
    #[must_use]
    pub fn from_error(err: &AttemptError, class: ErrorClass) -> Self {
        match (err, class) {
            (AttemptError::TimedOut(_), _) => Self::TimedOut,
            (AttemptError::Cancelled, _) => Self::Cancelled,
            (err, ErrorClass::Transient) => Self::TransientError(err.to_string()),
            (err, ErrorClass::Fatal) => Self::FatalError(err.to_string()),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// An attempt that has started but has no outcome yet.
#[derive(Debug)]
pub struct PendingAttempt {
    index: u32,
    delay: Duration,
    started_at: Instant,
}

impl PendingAttempt {
    /// Start attempt `index`, which waited `delay` beforehand.
    #[must_use]
    pub fn start(index: u32, delay: Duration) -> Self {
        Self {
            index,
            delay,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Record the outcome. Consumes the pending attempt, so an outcome is set once.
    #[must_use]
    pub fn finish(self, outcome: AttemptOutcome) -> Attempt {
        Attempt {
            index: self.index,
            delay: self.delay,
            started_at: self.started_at,
            elapsed: self.started_at.elapsed(),
            outcome,
        }
    }
}

/// A finished attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    index: u32,
    delay: Duration,
    started_at: Instant,
    elapsed: Duration,
    outcome: AttemptOutcome,
}

impl Attempt {
    /// Zero-based attempt number.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Backoff slept before this attempt.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub fn outcome(&self) -> &AttemptOutcome {
        &self.outcome
    }
}
