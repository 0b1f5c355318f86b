use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - At least one account per team and one attempt per stage
/// - A non-zero recovery lease
/// - The owner pass has a password to log in with
/// - Pacing range is ordered
/// - Backoff multiplier >= 1.0 and jitter ratio within [0, 1]
/// - Collaborator sections, when present, carry their required fields
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.run.accounts_per_team == 0 {
        return Err(invalid("run.accounts_per_team cannot be 0"));
    }

    if let Some(team) = &config.run.team {
        if team.trim().is_empty() {
            return Err(invalid("run.team cannot be empty"));
        }
    }

    if config.tracker.stale_after_secs == 0 {
        return Err(invalid("tracker.stale_after_secs cannot be 0"));
    }

    if config.run.owners
        && config
            .email
            .as_ref()
            .map_or(true, |email| email.default_password.is_none())
    {
        return Err(invalid("run.owners requires email.default_password"));
    }

    // Retry validation
    if config.retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts cannot be 0"));
    }
    if config.retry.verification_timeout_max_attempts == 0 {
        return Err(invalid("retry.verification_timeout_max_attempts cannot be 0"));
    }
    if config.retry.backoff_multiplier < 1.0 {
        return Err(invalid("retry.backoff_multiplier must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_ratio) {
        return Err(invalid("retry.jitter_ratio must be between 0.0 and 1.0"));
    }
    if config.retry.initial_delay_ms > config.retry.max_delay_ms {
        return Err(invalid("retry.initial_delay_ms cannot exceed retry.max_delay_ms"));
    }

    // Pacing validation
    if config.pacing.identity_delay_min_ms > config.pacing.identity_delay_max_ms {
        return Err(invalid(
            "pacing.identity_delay_min_ms cannot exceed pacing.identity_delay_max_ms",
        ));
    }

    // Collaborator validation
    if let Some(email) = &config.email {
        if email.api_base.trim().is_empty() {
            return Err(invalid("email.api_base cannot be empty"));
        }
        if email.domains.is_empty() {
            return Err(invalid("email.domains must list at least one domain"));
        }
    }
    if let Some(invite) = &config.invite {
        if invite.api_base.trim().is_empty() {
            return Err(invalid("invite.api_base cannot be empty"));
        }
    }
    if let Some(registrar) = &config.registrar {
        if registrar.api_base.trim().is_empty() {
            return Err(invalid("registrar.api_base cannot be empty"));
        }
        if registrar.admin_token.trim().is_empty() {
            return Err(invalid("registrar.admin_token cannot be empty"));
        }
    }
    if let Some(driver) = &config.driver {
        if driver.program.as_os_str().is_empty() {
            return Err(invalid("driver.program cannot be empty"));
        }
        if driver.timeout_secs == 0 {
            return Err(invalid("driver.timeout_secs cannot be 0"));
        }
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn assert_invalid(toml: &str, fragment: &str) {
        let config = load_config_from_str(toml).unwrap();
        match validate_config(&config) {
            Err(ConfigError::ValidationError(msg)) => {
                assert!(msg.contains(fragment), "unexpected message: {}", msg)
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_zero_accounts_fails() {
        assert_invalid("[run]\naccounts_per_team = 0", "accounts_per_team");
    }

    #[test]
    fn test_validate_zero_lease_fails() {
        assert_invalid("[tracker]\nstale_after_secs = 0", "stale_after_secs");
    }

    #[test]
    fn test_validate_owners_need_password() {
        assert_invalid("[run]\nowners = true", "run.owners");
        assert_invalid(
            "[run]\nowners = true\n[email]\napi_base = \"https://mail.test\"\ndomains = [\"a.test\"]",
            "email.default_password",
        );

        let config = load_config_from_str(
            "[run]\nowners = true\n[email]\napi_base = \"https://mail.test\"\ndomains = [\"a.test\"]\ndefault_password = \"pw\"",
        )
        .unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        assert_invalid("[retry]\nmax_attempts = 0", "max_attempts");
    }

    #[test]
    fn test_validate_backoff_and_jitter() {
        assert_invalid("[retry]\nbackoff_multiplier = 0.5", "backoff_multiplier");
        assert_invalid("[retry]\njitter_ratio = 1.5", "jitter_ratio");
        assert_invalid(
            "[retry]\ninitial_delay_ms = 10000\nmax_delay_ms = 100",
            "initial_delay_ms",
        );
    }

    #[test]
    fn test_validate_pacing_range() {
        assert_invalid(
            "[pacing]\nidentity_delay_min_ms = 9000\nidentity_delay_max_ms = 1000",
            "identity_delay_min_ms",
        );
    }

    #[test]
    fn test_validate_email_without_domains() {
        assert_invalid(
            "[email]\napi_base = \"https://mail.test\"\ndomains = []",
            "email.domains",
        );
    }

    #[test]
    fn test_validate_registrar_without_token() {
        assert_invalid(
            "[registrar]\napi_base = \"https://r.test\"\nadmin_token = \"\"",
            "admin_token",
        );
    }
}
