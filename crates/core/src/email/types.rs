//! Email provider trait, errors, and configuration.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::Credentials;
use crate::tracker::ErrorKind;

/// Errors from the mailbox service.
#[derive(Debug, Error)]
pub enum EmailError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success code.
    #[error("mail API error: {code} - {message}")]
    Api { code: i64, message: String },

    /// Failed to parse response.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// No verification code arrived in time.
    #[error("no verification code for {email} after {waited_secs}s")]
    Timeout { email: String, waited_secs: u64 },

    /// Provider is missing required settings.
    #[error("email provider not configured: {0}")]
    NotConfigured(String),
}

impl EmailError {
    /// Classification for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmailError::Timeout { .. } => ErrorKind::VerificationTimeout,
            _ => ErrorKind::Transient,
        }
    }
}

/// A mailbox that could not be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateFailure {
    /// Address that was attempted.
    pub email: String,
    pub detail: String,
}

/// Creates disposable identities and reads their verification mail.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Create `count` mailboxes. Each element succeeds or fails independently.
    async fn create(&self, count: usize) -> Vec<Result<Credentials, CreateFailure>>;

    /// Wait for a verification code addressed to `email`.
    async fn poll_verification_code(
        &self,
        email: &str,
        timeout: Duration,
    ) -> Result<String, EmailError>;
}

/// Mail service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Base URL of the mail admin API.
    pub api_base: String,
    /// Value of the `Authorization` header.
    #[serde(default)]
    pub api_auth: String,
    /// Domains new addresses are drawn from.
    #[serde(default)]
    pub domains: Vec<String>,
    /// Mailbox role name.
    #[serde(default = "default_role")]
    pub role: String,
    /// Fixed password for new identities. A random one is generated when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_password: Option<String>,
    /// Appended to the random part of each local part.
    #[serde(default)]
    pub local_part_suffix: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Delay between inbox polls in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_role() -> String {
    "member".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    3
}
