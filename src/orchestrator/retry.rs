//! Retry policy for model requests

use std::time::Duration;

use crate::config::TurnConfig;
use crate::llm::LlmError;

/// Fixed-delay retry policy for a turn's model request
///
/// Controls how many times a failed request is re-issued and how long to
/// wait before each new attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before every retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_secs(1),
        }
    }
}

impl From<&TurnConfig> for RetryPolicy {
    fn from(config: &TurnConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay,
        }
    }
}

impl RetryPolicy {
    /// Whether a request that failed with `error` after `retries_used`
    /// retries should be attempted again. Cancellation never is.
    #[must_use]
    pub const fn should_retry(&self, error: &LlmError, retries_used: u32) -> bool {
        !error.is_cancelled() && retries_used < self.max_retries
    }

    /// Retries still available after `retries_used`
    #[must_use]
    pub const fn remaining(&self, retries_used: u32) -> u32 {
        self.max_retries.saturating_sub(retries_used)
    }
}
