//! Retry and failure policy configuration.

use serde::{Deserialize, Serialize};

/// Retry configuration for stage execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per stage per run, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Attempt cap when the verification code never arrived.
    #[serde(default = "default_verification_timeout_attempts")]
    pub verification_timeout_max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Random spread applied to each delay, as a fraction of it (0.0-1.0).
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_verification_timeout_attempts() -> u32 {
    2
}

fn default_initial_delay() -> u64 {
    2000 // 2 seconds
}

fn default_max_delay() -> u64 {
    60_000 // 1 minute
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_ratio() -> f64 {
    0.25
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            verification_timeout_max_attempts: default_verification_timeout_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetryConfig {
    /// Retries without waiting. Used by tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            verification_timeout_max_attempts: max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
            jitter_ratio: 0.0,
        }
    }
}

/// What to do when the target site rejects an identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UiRejectedAction {
    /// Mark the identity abandoned and move on.
    #[default]
    Abandon,
    /// Treat the rejection as transient and retry within the attempt cap.
    Retry,
}

/// Failure classification policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub ui_rejected: UiRejectedAction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.verification_timeout_max_attempts, 2);
        assert_eq!(config.initial_delay_ms, 2000);
        assert_eq!(config.max_delay_ms, 60_000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.jitter_ratio, 0.25);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RetryConfig = toml::from_str("max_attempts = 5").unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay_ms, 2000);
    }

    #[test]
    fn test_policy_deserialize() {
        let policy: PolicyConfig = toml::from_str(r#"ui_rejected = "retry""#).unwrap();
        assert_eq!(policy.ui_rejected, UiRejectedAction::Retry);

        let policy: PolicyConfig = toml::from_str("").unwrap();
        assert_eq!(policy.ui_rejected, UiRejectedAction::Abandon);
    }
}
