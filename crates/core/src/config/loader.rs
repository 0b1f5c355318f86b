use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment variables overriding the file.
///
/// Nested keys are separated by a double underscore, e.g.
/// `TEAMPROV_RUN__ACCOUNTS_PER_TEAM=2`.
pub const ENV_PREFIX: &str = "TEAMPROV_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.run.accounts_per_team, 4);
        assert_eq!(config.tracker.path.to_str(), Some("teamprov.db"));
        assert!(config.email.is_none());
    }

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[run]
accounts_per_team = 2
team = "alpha"

[retry]
max_attempts = 5
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.run.accounts_per_team, 2);
        assert_eq!(config.run.team.as_deref(), Some("alpha"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 2000);
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[run]
accounts_per_team = "many"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[tracker]
path = "/tmp/provision.db"

[pacing]
enabled = false

[driver]
program = "/usr/local/bin/signup-driver"
args = ["--headless"]
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.tracker.path.to_str(), Some("/tmp/provision.db"));
        assert!(!config.pacing.enabled);
        let driver = config.driver.unwrap();
        assert_eq!(driver.args, vec!["--headless".to_string()]);
        assert_eq!(driver.timeout_secs, 600);
    }
}
