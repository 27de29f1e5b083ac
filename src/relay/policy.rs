//! Retry policy: attempt budget, backoff sequence and error classification.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::AttemptError;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff sequence, one entry per retry.
pub const DEFAULT_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// How the coordinator reacts to an attempt error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try again after the next backoff delay.
    Transient,
    /// Stop immediately and surface the error.
    Fatal,
}

/// Maps an attempt error to an [`ErrorClass`].
pub type Classifier = Arc<dyn Fn(&AttemptError) -> ErrorClass + Send + Sync>;

/// Classifier that retries overloads only, and optionally timeouts.
#[must_use]
pub fn overload_classifier(retry_on_timeout: bool) -> Classifier {
    Arc::new(move |err: &AttemptError| match err {
        AttemptError::TimedOut(_) if retry_on_timeout => ErrorClass::Transient,
        AttemptError::Cancelled | AttemptError::Spawn(_) | AttemptError::Wait(_) => {
            ErrorClass::Fatal
        }
        err if err.is_overloaded() => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    })
}

/// Errors from policy construction.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RetryPolicyError {
    #[error("Backoff sequence has {delays} entries but max_retries is {max_retries}")]
    NotEnoughDelays { delays: usize, max_retries: u32 },
}

/// Attempt budget, backoff and classification for one relay request.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    delays: Vec<Duration>,
    classifier: Classifier,
}

impl RetryPolicy {
    /// Create a policy with the default overload classifier.
    ///
    /// # Errors
    ///
    /// Returns `RetryPolicyError::NotEnoughDelays` if `delays` has fewer
    /// entries than `max_retries`.
    pub fn new(max_retries: u32, delays: Vec<Duration>) -> Result<Self, RetryPolicyError> {
        if delays.len() < max_retries as usize {
            return Err(RetryPolicyError::NotEnoughDelays {
                delays: delays.len(),
                max_retries,
            });
        }

        Ok(Self {
            max_retries,
            delays,
            classifier: overload_classifier(false),
        })
    }

    /// Replace the classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Treat per-attempt timeouts as transient.
    #[must_use]
    pub fn retry_on_timeout(self, retry: bool) -> Self {
        self.with_classifier(overload_classifier(retry))
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts allowed, first attempt included.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Delay before attempt `index`; zero for the first attempt.
    #[must_use]
    pub fn delay_before(&self, index: u32) -> Duration {
        match index {
            0 => Duration::ZERO,
            i => self
                .delays
                .get(i as usize - 1)
                .copied()
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Sum of the delays actually used by `max_retries` retries.
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        self.delays.iter().take(self.max_retries as usize).sum()
    }

    /// Classify an attempt error.
    #[must_use]
    pub fn classify(&self, err: &AttemptError) -> ErrorClass {
        (self.classifier)(err)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delays: DEFAULT_DELAYS.to_vec(),
            classifier: overload_classifier(false),
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("delays", &self.delays)
            .finish_non_exhaustive()
    }
}
