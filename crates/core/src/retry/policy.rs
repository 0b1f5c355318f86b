//! Retry decisions and backoff delays.

use std::time::Duration;

use super::{PolicyConfig, RetryConfig, UiRejectedAction};
use crate::driver::{DriverError, DriverErrorKind};
use crate::tracker::ErrorKind;

/// Decides whether a failed stage attempt is retried, and after how long.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    retry: RetryConfig,
    failure: PolicyConfig,
}

impl RetryPolicy {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            failure: PolicyConfig::default(),
        }
    }

    pub fn with_failure_policy(mut self, failure: PolicyConfig) -> Self {
        self.failure = failure;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Attempt cap for a failure kind.
    pub fn max_attempts(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::VerificationTimeout => self
                .retry
                .max_attempts
                .min(self.retry.verification_timeout_max_attempts),
            _ => self.retry.max_attempts,
        }
    }

    /// Whether a stage that failed on its `attempt`-th try (1-based) gets another.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        match kind {
            ErrorKind::IdentityPoisoned | ErrorKind::Duplicate | ErrorKind::StorageFailure => false,
            _ => attempt < self.max_attempts(kind),
        }
    }

    /// Delay before retrying after the `attempt`-th try (1-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let base = self.retry.initial_delay_ms as f64 * self.retry.backoff_multiplier.powi(exponent);
        let capped = base.min(self.retry.max_delay_ms as f64);

        let ratio = self.retry.jitter_ratio.clamp(0.0, 1.0);
        let jittered = if ratio > 0.0 {
            let spread = (fastrand::f64() * 2.0 - 1.0) * ratio;
            capped * (1.0 + spread)
        } else {
            capped
        };

        let ms = jittered.clamp(0.0, self.retry.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Map a driver failure to the tracker's error kind.
    pub fn classify(&self, error: &DriverError) -> ErrorKind {
        match error.kind {
            DriverErrorKind::Transient => ErrorKind::Transient,
            DriverErrorKind::VerificationTimeout => ErrorKind::VerificationTimeout,
            DriverErrorKind::UiRejected => match self.failure.ui_rejected {
                UiRejectedAction::Abandon => ErrorKind::IdentityPoisoned,
                UiRejectedAction::Retry => ErrorKind::Transient,
            },
        }
    }
}
