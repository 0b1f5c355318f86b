//! Driver backed by an external program.
//!
//! The program is invoked as `{program} {args..} register|authorize` with the
//! identity passed through the environment. Its last non-empty stdout line
//! must be a JSON result:
//!
//! ```text
//! {"status":"ok","tokens":{"accessToken":"..","refreshToken":"..","idToken":".."}}
//! {"status":"error","kind":"ui_rejected","detail":"domain not supported"}
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{DriverError, DriverErrorKind, RegistrationDriver};
use crate::identity::{AuthTokens, Identity};

/// Environment variable carrying the identity's email.
pub const EMAIL_ENV: &str = "TEAMPROV_EMAIL";
/// Environment variable carrying the identity's password.
pub const PASSWORD_ENV: &str = "TEAMPROV_PASSWORD";

/// Configuration for [`CommandDriver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Program to run.
    pub program: PathBuf,
    /// Arguments placed before the action name.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-step timeout in seconds (default: 600).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    600
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Register,
    Authorize,
}

impl Action {
    fn as_str(&self) -> &'static str {
        match self {
            Action::Register => "register",
            Action::Authorize => "authorize",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum StepResult {
    Ok {
        #[serde(default)]
        tokens: Option<AuthTokens>,
    },
    Error {
        kind: DriverErrorKind,
        #[serde(default)]
        detail: String,
    },
}

/// Runs an external automation program for each driver step.
pub struct CommandDriver {
    config: DriverConfig,
}

impl CommandDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    async fn invoke(&self, action: Action, identity: &Identity) -> Result<StepResult, DriverError> {
        debug!(
            "Running driver {} {} for {}",
            self.config.program.display(),
            action.as_str(),
            identity.email
        );

        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(action.as_str())
            .env(EMAIL_ENV, &identity.email)
            .env(PASSWORD_ENV, &identity.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::transient(format!(
                    "failed to start {}: {}",
                    self.config.program.display(),
                    e
                ))
            })?;

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(DriverError::transient(format!(
                    "{} failed: {}",
                    action.as_str(),
                    e
                )))
            }
            Err(_) => {
                return Err(DriverError::transient(format!(
                    "{} timed out after {}s",
                    action.as_str(),
                    self.config.timeout_secs
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_result(&stdout).ok_or_else(|| {
            let stderr = String::from_utf8_lossy(&output.stderr);
            DriverError::transient(format!(
                "{} produced no result ({}): {}",
                action.as_str(),
                output.status,
                tail(&stderr, 300)
            ))
        })
    }
}

#[async_trait]
impl RegistrationDriver for CommandDriver {
    async fn register(&self, identity: &Identity) -> Result<(), DriverError> {
        match self.invoke(Action::Register, identity).await? {
            StepResult::Ok { .. } => Ok(()),
            StepResult::Error { kind, detail } => Err(DriverError::new(kind, detail)),
        }
    }

    async fn authorize(&self, identity: &Identity) -> Result<AuthTokens, DriverError> {
        match self.invoke(Action::Authorize, identity).await? {
            StepResult::Ok {
                tokens: Some(tokens),
            } => Ok(tokens),
            StepResult::Ok { tokens: None } => Err(DriverError::transient(
                "authorize reported success without tokens",
            )),
            StepResult::Error { kind, detail } => Err(DriverError::new(kind, detail)),
        }
    }
}

fn parse_result(stdout: &str) -> Option<StepResult> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}

fn tail(s: &str, max_chars: usize) -> String {
    let trimmed = s.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_driver(script: &str, timeout_secs: u64) -> CommandDriver {
        CommandDriver::new(DriverConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string(), "driver".to_string()],
            timeout_secs,
        })
    }

    #[test]
    fn test_parse_ok_with_tokens() {
        let out = "starting browser\n{\"status\":\"ok\",\"tokens\":{\"accessToken\":\"a\",\"refreshToken\":\"r\",\"idToken\":\"i\"}}\n\n";
        match parse_result(out) {
            Some(StepResult::Ok { tokens: Some(t) }) => assert_eq!(t.access_token, "a"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error() {
        let out = "{\"status\":\"error\",\"kind\":\"ui_rejected\",\"detail\":\"blocked\"}";
        match parse_result(out) {
            Some(StepResult::Error { kind, detail }) => {
                assert_eq!(kind, DriverErrorKind::UiRejected);
                assert_eq!(detail, "blocked");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_result("").is_none());
        assert!(parse_result("Traceback (most recent call last)").is_none());
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("  short  ", 10), "short");
        assert_eq!(tail("abcdefghij", 3), "hij");
    }

    #[tokio::test]
    async fn test_register_passes_identity_through_env() {
        let driver = shell_driver(
            r#"[ "$1" = register ] && [ "$TEAMPROV_EMAIL" = "a@x.test" ] && echo '{"status":"ok"}'"#,
            10,
        );
        let identity = Identity::new("a@x.test", "pw");
        driver.register(&identity).await.unwrap();
    }

    #[tokio::test]
    async fn test_authorize_error_result() {
        let driver = shell_driver(
            r#"echo '{"status":"error","kind":"verification_timeout","detail":"no mail"}'"#,
            10,
        );
        let err = driver
            .authorize(&Identity::new("a@x.test", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::VerificationTimeout);
    }

    #[tokio::test]
    async fn test_missing_program_is_transient() {
        let driver = CommandDriver::new(DriverConfig {
            program: PathBuf::from("/nonexistent/driver-binary"),
            args: vec![],
            timeout_secs: 5,
        });
        let err = driver
            .register(&Identity::new("a@x.test", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let driver = shell_driver("sleep 5", 1);
        let err = driver
            .register(&Identity::new("a@x.test", "pw"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Transient);
        assert!(err.detail.contains("timed out"));
    }
}
