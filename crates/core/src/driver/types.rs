//! Driver trait and error types.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{AuthTokens, Identity};

/// How a driver step failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorKind {
    /// Network trouble, timeouts, flaky pages.
    Transient,
    /// The verification code never arrived.
    VerificationTimeout,
    /// The site refused the identity (e.g. its domain is blocked).
    UiRejected,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverErrorKind::Transient => "transient",
            DriverErrorKind::VerificationTimeout => "verification_timeout",
            DriverErrorKind::UiRejected => "ui_rejected",
        };
        f.write_str(s)
    }
}

/// A failed driver step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub detail: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Transient, detail)
    }

    pub fn verification_timeout(detail: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::VerificationTimeout, detail)
    }

    pub fn ui_rejected(detail: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::UiRejected, detail)
    }
}

/// Performs signup and authorization for an identity.
///
/// Implementations own an exclusive session; callers never run two steps
/// concurrently.
#[async_trait]
pub trait RegistrationDriver: Send + Sync {
    /// Sign the identity up with the target service.
    async fn register(&self, identity: &Identity) -> Result<(), DriverError>;

    /// Log the identity in and complete the OAuth flow.
    async fn authorize(&self, identity: &Identity) -> Result<AuthTokens, DriverError>;
}
