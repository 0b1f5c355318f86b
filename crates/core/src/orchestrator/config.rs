//! Run and pacing configuration.

use serde::{Deserialize, Serialize};

/// What a run provisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Fully provisioned identities wanted per team.
    #[serde(default = "default_accounts_per_team")]
    pub accounts_per_team: usize,

    /// Only process the team with this id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    /// After the member phase, authorize each team's owner account and
    /// register it downstream.
    #[serde(default)]
    pub owners: bool,
}

fn default_accounts_per_team() -> usize {
    4
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            accounts_per_team: default_accounts_per_team(),
            team: None,
            owners: false,
        }
    }
}

/// Delays spreading external load over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingConfig {
    /// When disabled no delay is applied at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Lower bound of the random delay between identities (milliseconds).
    #[serde(default = "default_identity_min")]
    pub identity_delay_min_ms: u64,

    /// Upper bound of the random delay between identities (milliseconds).
    #[serde(default = "default_identity_max")]
    pub identity_delay_max_ms: u64,

    /// Delay between teams (milliseconds).
    #[serde(default = "default_team_delay")]
    pub team_delay_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_identity_min() -> u64 {
    3000 // 3 seconds
}

fn default_identity_max() -> u64 {
    6000 // 6 seconds
}

fn default_team_delay() -> u64 {
    3000 // 3 seconds
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            identity_delay_min_ms: default_identity_min(),
            identity_delay_max_ms: default_identity_max(),
            team_delay_ms: default_team_delay(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let run = RunConfig::default();
        assert_eq!(run.accounts_per_team, 4);
        assert!(run.team.is_none());

        let pacing = PacingConfig::default();
        assert!(pacing.enabled);
        assert_eq!(pacing.identity_delay_min_ms, 3000);
        assert_eq!(pacing.identity_delay_max_ms, 6000);
        assert_eq!(pacing.team_delay_ms, 3000);
    }

    #[test]
    fn test_deserialize_minimal() {
        let pacing: PacingConfig = toml::from_str("enabled = false").unwrap();
        assert!(!pacing.enabled);
        assert_eq!(pacing.team_delay_ms, 3000);

        let run: RunConfig = toml::from_str(r#"team = "alpha""#).unwrap();
        assert_eq!(run.team.as_deref(), Some("alpha"));
        assert_eq!(run.accounts_per_team, 4);
        assert!(!run.owners);
    }
}
