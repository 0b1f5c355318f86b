//! Registrar trait, errors, and configuration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{AuthTokens, Identity};
use crate::tracker::ErrorKind;

/// Errors from the downstream registrar.
#[derive(Debug, Error)]
pub enum RegistrarError {
    /// The registrar already holds this identity.
    #[error("account {0} already registered")]
    Duplicate(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The registrar refused the request.
    #[error("registrar rejected request: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Failed to parse response.
    #[error("invalid registrar response: {0}")]
    InvalidResponse(String),
}

impl RegistrarError {
    /// Classification for retry decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistrarError::Duplicate(_) => ErrorKind::Duplicate,
            _ => ErrorKind::Transient,
        }
    }
}

/// Stores an authorized credential and returns its downstream identifier.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn add(&self, identity: &Identity, tokens: &AuthTokens) -> Result<String, RegistrarError>;
}

/// Registrar API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrarConfig {
    /// Base URL of the registrar API.
    pub api_base: String,
    /// Admin bearer token.
    pub admin_token: String,
    /// Account type recorded with each credential.
    #[serde(default = "default_account_type")]
    pub account_type: String,
    /// Scheduling priority recorded with each credential.
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Token lifetime reported when the driver gave none, in seconds.
    #[serde(default = "default_expires_in")]
    pub default_expires_in: u64,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_account_type() -> String {
    "shared".to_string()
}

fn default_priority() -> u32 {
    50
}

fn default_expires_in() -> u64 {
    864_000 // 10 days
}

fn default_timeout() -> u64 {
    30
}
