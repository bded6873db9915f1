//! Exponential backoff between recovery attempts

use redis_stash_core::RetryConfig;
use std::time::Duration;
use tracing::debug;

/// Largest exponent fed into the doubling, so the shift cannot overflow
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Decides whether a failed operation gets another attempt and how long to
/// wait before it
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    /// Build a controller from the configured backoff knobs
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The wait before retry number `attempt`, or `None` when the attempt
    /// budget is exhausted
    ///
    /// The wait doubles per attempt starting from the configured base and is
    /// clamped to the configured maximum when one is set.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.config.max_retries {
            return None;
        }

        let factor = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
        let mut wait = self.config.base_wait.saturating_mul(factor);
        if let Some(cap) = self.config.max_wait {
            wait = wait.min(cap);
        }
        Some(wait)
    }

    /// Sleep out the backoff for `attempt`; reports whether a retry is allowed
    pub async fn wait(&self, attempt: u32) -> bool {
        let Some(wait) = self.delay_for(attempt) else {
            return false;
        };

        debug!(
            "waiting about {} milliseconds for try {}/{}",
            wait.as_millis(),
            attempt,
            self.config.max_retries
        );
        tokio::time::sleep(wait).await;
        true
    }
}
