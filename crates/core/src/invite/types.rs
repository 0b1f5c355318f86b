//! Invite trait, outcome, and errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::team::Team;
use crate::tracker::ErrorKind;

/// Errors that fail a whole invite batch.
#[derive(Debug, Error)]
pub enum InviteError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The team's credential was refused.
    #[error("team credential rejected (HTTP {0})")]
    Unauthorized(u16),

    /// API returned an error.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Failed to parse response.
    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl InviteError {
    /// Every member of the failed batch shares this kind.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::BulkOperationFailure
    }
}

/// An address the team refused individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteRejection {
    pub email: String,
    pub reason: String,
}

/// Result of a bulk invite that reached the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteOutcome {
    pub invited: Vec<String>,
    pub rejected: Vec<InviteRejection>,
}

impl InviteOutcome {
    /// Every address accepted.
    pub fn all(emails: &[String]) -> Self {
        Self {
            invited: emails.to_vec(),
            rejected: Vec::new(),
        }
    }

    pub fn is_invited(&self, email: &str) -> bool {
        self.invited.iter().any(|e| e == email)
    }

    pub fn rejection(&self, email: &str) -> Option<&InviteRejection> {
        self.rejected.iter().find(|r| r.email == email)
    }
}

/// Invites a batch of addresses into a team in one call.
#[async_trait]
pub trait TeamInviter: Send + Sync {
    async fn invite(&self, team: &Team, emails: &[String]) -> Result<InviteOutcome, InviteError>;

    /// Seats still free in the team, counting pending invites as taken.
    ///
    /// `None` when the inviter cannot tell; callers then assume no limit.
    async fn available_seats(&self, _team: &Team) -> Result<Option<usize>, InviteError> {
        Ok(None)
    }
}

/// Invite API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteConfig {
    /// Base URL of the team API.
    pub api_base: String,
    /// Role granted to invited members.
    #[serde(default = "default_role")]
    pub role: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Query free seats before creating identities for a team.
    #[serde(default = "default_check_seats")]
    pub check_seats: bool,
}

fn default_check_seats() -> bool {
    true
}

fn default_role() -> String {
    "standard-user".to_string()
}

fn default_timeout() -> u64 {
    15
}
