//! Exponential backoff and the re-queue decision.

use std::time::Duration;

use voxlift_job_store::UploadJob;

use crate::config::RetryConfig;
use crate::error::UploadError;

/// What happens to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue as attempt `attempt`, eligible again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Give up: the error is fatal or the budget is spent.
    Fail,
}

/// Pure backoff policy: no jitter, no clock, no state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// `min(base * 2^(attempt-1), max)` for a 1-based attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Decides between re-queue and terminal failure for `job` after its
    /// current attempt failed with `error`.
    pub fn decide(&self, error: &UploadError, job: &UploadJob) -> RetryDecision {
        if !error.is_retryable() || job.retries_exhausted() {
            return RetryDecision::Fail;
        }
        let attempt = job.retry_count + 1;
        RetryDecision::Retry {
            attempt,
            delay: self.delay_for_attempt(attempt),
        }
    }
}
