use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::driver::DriverConfig;
use crate::email::EmailConfig;
use crate::invite::InviteConfig;
use crate::orchestrator::{PacingConfig, RunConfig};
use crate::registrar::RegistrarConfig;
use crate::retry::{PolicyConfig, RetryConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub teams: TeamsConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Mailbox service. Required by `run`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,
    /// Team invite API. Required by `run`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite: Option<InviteConfig>,
    /// Downstream registrar. Required by `run`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrar: Option<RegistrarConfig>,
    /// Registration driver program. Required by `run`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_path")]
    pub path: PathBuf,

    /// In-progress records untouched this long are treated as abandoned by a
    /// crashed worker and taken over (seconds).
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_tracker_path() -> PathBuf {
    PathBuf::from("teamprov.db")
}

fn default_stale_after_secs() -> u64 {
    900 // 15 minutes
}

impl TrackerConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            path: default_tracker_path(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TeamsConfig {
    #[serde(default = "default_teams_path")]
    pub path: PathBuf,
}

fn default_teams_path() -> PathBuf {
    PathBuf::from("team.json")
}

impl Default for TeamsConfig {
    fn default() -> Self {
        Self {
            path: default_teams_path(),
        }
    }
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub tracker: TrackerConfig,
    pub teams: TeamsConfig,
    pub run: RunConfig,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
    pub policy: PolicyConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<SanitizedEmailConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite: Option<InviteConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrar: Option<SanitizedRegistrarConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverConfig>,
}

/// Sanitized email config (API auth and password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEmailConfig {
    pub api_base: String,
    pub api_auth_configured: bool,
    pub domains: Vec<String>,
    pub role: String,
    pub default_password_configured: bool,
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
}

/// Sanitized registrar config (admin token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedRegistrarConfig {
    pub api_base: String,
    pub admin_token_configured: bool,
    pub account_type: String,
    pub priority: u32,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            tracker: config.tracker.clone(),
            teams: config.teams.clone(),
            run: config.run.clone(),
            pacing: config.pacing.clone(),
            retry: config.retry.clone(),
            policy: config.policy.clone(),
            email: config.email.as_ref().map(|e| SanitizedEmailConfig {
                api_base: e.api_base.clone(),
                api_auth_configured: !e.api_auth.is_empty(),
                domains: e.domains.clone(),
                role: e.role.clone(),
                default_password_configured: e.default_password.is_some(),
                timeout_secs: e.timeout_secs,
                poll_interval_secs: e.poll_interval_secs,
            }),
            invite: config.invite.clone(),
            registrar: config.registrar.as_ref().map(|r| SanitizedRegistrarConfig {
                api_base: r.api_base.clone(),
                admin_token_configured: !r.admin_token.is_empty(),
                account_type: r.account_type.clone(),
                priority: r.priority,
                timeout_secs: r.timeout_secs,
            }),
            driver: config.driver.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::UiRejectedAction;

    #[test]
    fn test_deserialize_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.tracker.path, PathBuf::from("teamprov.db"));
        assert_eq!(config.tracker.stale_after(), Duration::from_secs(900));
        assert!(!config.run.owners);
        assert_eq!(config.teams.path, PathBuf::from("team.json"));
        assert_eq!(config.run.accounts_per_team, 4);
        assert!(config.pacing.enabled);
        assert_eq!(config.policy.ui_rejected, UiRejectedAction::Abandon);
        assert!(config.registrar.is_none());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
[tracker]
path = "state.db"

[teams]
path = "teams.json"

[policy]
ui_rejected = "retry"

[email]
api_base = "https://mail.test/api"
api_auth = "mail-secret"
domains = ["a.test"]

[invite]
api_base = "https://team.test/api"

[registrar]
api_base = "https://registry.test"
admin_token = "admin-secret"

[driver]
program = "signup-driver"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.policy.ui_rejected, UiRejectedAction::Retry);
        assert_eq!(config.email.as_ref().unwrap().domains, vec!["a.test"]);
        assert_eq!(config.invite.as_ref().unwrap().role, "standard-user");
        assert_eq!(config.registrar.as_ref().unwrap().priority, 50);
        assert_eq!(
            config.driver.as_ref().unwrap().program,
            PathBuf::from("signup-driver")
        );
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let toml = r#"
[email]
api_base = "https://mail.test/api"
api_auth = "mail-secret"
domains = ["a.test"]
default_password = "hunter22"

[registrar]
api_base = "https://registry.test"
admin_token = "admin-secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("mail-secret"));
        assert!(!json.contains("admin-secret"));
        assert!(!json.contains("hunter22"));

        let email = sanitized.email.unwrap();
        assert!(email.api_auth_configured);
        assert!(email.default_password_configured);
        assert!(sanitized.registrar.unwrap().admin_token_configured);
    }
}
