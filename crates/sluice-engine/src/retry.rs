//! Retry decisions for failed job attempts.

use sluice_core::config::{JobSpec, RetryConfig};
use sluice_core::job::JobStatus;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the job to pending; it becomes eligible after `delay`.
    Retry { delay: Duration },
    /// The attempt's status is final.
    Final,
}

/// Applies the retry configuration to one attempt outcome.
#[derive(Debug, Clone)]
pub struct RetryPolicyManager {
    config: RetryConfig,
}

impl RetryPolicyManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide what follows an attempt that ended with `status`.
    ///
    /// `attempts` counts attempts made so far, including this one. Only
    /// failed and timed-out attempts of retryable jobs outside the excluded
    /// classes are retried, and never beyond `max_attempts` total attempts.
    pub fn decide(&self, job: &JobSpec, status: JobStatus, attempts: u32) -> RetryDecision {
        if !matches!(status, JobStatus::Failed | JobStatus::TimedOut) {
            return RetryDecision::Final;
        }
        if !job.retryable || self.is_excluded(job) {
            return RetryDecision::Final;
        }
        if attempts >= self.config.max_attempts {
            return RetryDecision::Final;
        }
        RetryDecision::Retry {
            delay: self.backoff(attempts),
        }
    }

    pub fn is_excluded(&self, job: &JobSpec) -> bool {
        job.class
            .as_ref()
            .is_some_and(|class| self.config.excluded_job_classes.contains(class))
    }

    /// Delay before retry number `retry` (1-based):
    /// `base * multiplier^(retry - 1)`, capped at `max_delay_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = u64::from(self.config.multiplier).saturating_pow(exponent);
        let delay_ms = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}
