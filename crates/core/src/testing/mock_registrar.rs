//! Mock downstream registrar for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::identity::{AuthTokens, Identity};
use crate::registrar::{Registrar, RegistrarError};

/// A recorded registrar call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRegistration {
    pub email: String,
    pub access_token: String,
}

/// Mock implementation of the Registrar trait.
///
/// Hands out `acc-{n}` references in call order.
#[derive(Debug)]
pub struct MockRegistrar {
    calls: Arc<RwLock<Vec<RecordedRegistration>>>,
    counter: Arc<RwLock<usize>>,
    duplicates: Arc<RwLock<HashSet<String>>>,
    /// Rejections by address; `None` rejects everyone.
    rejections: Arc<RwLock<HashMap<Option<String>, String>>>,
}

impl Default for MockRegistrar {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistrar {
    /// Create a new mock registrar.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            counter: Arc::new(RwLock::new(0)),
            duplicates: Arc::new(RwLock::new(HashSet::new())),
            rejections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Report `email` as already registered.
    pub async fn set_duplicate(&self, email: &str) {
        self.duplicates.write().await.insert(email.to_string());
    }

    /// Reject `email` (or everyone) with a server error.
    pub async fn reject(&self, email: Option<&str>, message: &str) {
        self.rejections
            .write()
            .await
            .insert(email.map(str::to_string), message.to_string());
    }

    /// Stop rejecting anyone.
    pub async fn clear_rejections(&self) {
        self.rejections.write().await.clear();
    }

    /// Get all recorded registrations.
    pub async fn recorded_registrations(&self) -> Vec<RecordedRegistration> {
        self.calls.read().await.clone()
    }

    /// Get the number of add calls made.
    pub async fn add_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl Registrar for MockRegistrar {
    async fn add(&self, identity: &Identity, tokens: &AuthTokens) -> Result<String, RegistrarError> {
        self.calls.write().await.push(RecordedRegistration {
            email: identity.email.clone(),
            access_token: tokens.access_token.clone(),
        });

        if self.duplicates.read().await.contains(&identity.email) {
            return Err(RegistrarError::Duplicate(identity.email.clone()));
        }

        let rejections = self.rejections.read().await;
        if let Some(message) = rejections
            .get(&Some(identity.email.clone()))
            .or_else(|| rejections.get(&None))
        {
            return Err(RegistrarError::Rejected {
                status: 500,
                message: message.clone(),
            });
        }

        let mut counter = self.counter.write().await;
        *counter += 1;
        Ok(format!("acc-{}", *counter))
    }
}
