//! Randomized delays between identities and teams.

use std::time::Duration;

use tracing::debug;

use super::{CancellationToken, PacingConfig};

/// Applies the configured pacing delays.
#[derive(Debug, Clone, Default)]
pub struct Pacer {
    config: PacingConfig,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// A pacer that never waits.
    pub fn disabled() -> Self {
        Self {
            config: PacingConfig {
                enabled: false,
                ..PacingConfig::default()
            },
        }
    }

    /// Random delay in the configured identity range.
    pub fn identity_delay(&self) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        let min = self.config.identity_delay_min_ms;
        let max = self.config.identity_delay_max_ms.max(min);
        Duration::from_millis(fastrand::u64(min..=max))
    }

    pub fn team_delay(&self) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        Duration::from_millis(self.config.team_delay_ms)
    }

    /// Wait before the next identity. Returns early on cancellation.
    pub async fn between_identities(&self, cancellation: &CancellationToken) {
        let delay = self.identity_delay();
        if !delay.is_zero() {
            debug!("Pausing {}ms before next identity", delay.as_millis());
            pause(delay, cancellation).await;
        }
    }

    /// Wait before the next team. Returns early on cancellation.
    pub async fn between_teams(&self, cancellation: &CancellationToken) {
        let delay = self.team_delay();
        if !delay.is_zero() {
            debug!("Pausing {}ms before next team", delay.as_millis());
            pause(delay, cancellation).await;
        }
    }
}

async fn pause(delay: Duration, cancellation: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancellation.cancelled() => debug!("Pause cut short by cancellation"),
    }
}
