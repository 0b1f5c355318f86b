//! Mock email provider for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::email::{CreateFailure, EmailError, EmailProvider};
use crate::identity::Credentials;

/// Mock implementation of the EmailProvider trait.
///
/// Addresses are generated as `user{n}@mock.test` with a running counter, so
/// every created mailbox is unique across calls.
///
/// # Example
///
/// ```rust,ignore
/// use teamprov_core::testing::MockEmailProvider;
///
/// let email = MockEmailProvider::new();
/// email.fail_next(1).await;
///
/// let results = email.create(3).await;
/// assert!(results[0].is_err());
/// assert_eq!(email.create_calls().await, vec![3]);
/// ```
#[derive(Debug)]
pub struct MockEmailProvider {
    /// Requested counts, one entry per `create` call.
    create_calls: Arc<RwLock<Vec<usize>>>,
    /// Next address index.
    counter: Arc<RwLock<usize>>,
    /// Number of upcoming mailboxes that fail.
    failures: Arc<RwLock<usize>>,
    /// Verification codes by address.
    codes: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for MockEmailProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEmailProvider {
    /// Create a new mock provider.
    pub fn new() -> Self {
        Self {
            create_calls: Arc::new(RwLock::new(Vec::new())),
            counter: Arc::new(RwLock::new(0)),
            failures: Arc::new(RwLock::new(0)),
            codes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Make the next `count` mailboxes fail.
    pub async fn fail_next(&self, count: usize) {
        *self.failures.write().await = count;
    }

    /// Register the code returned for `email`.
    pub async fn set_code(&self, email: &str, code: &str) {
        self.codes
            .write()
            .await
            .insert(email.to_string(), code.to_string());
    }

    /// Counts requested so far.
    pub async fn create_calls(&self) -> Vec<usize> {
        self.create_calls.read().await.clone()
    }

    /// Total mailboxes requested.
    pub async fn requested(&self) -> usize {
        self.create_calls.read().await.iter().sum()
    }
}

#[async_trait]
impl EmailProvider for MockEmailProvider {
    async fn create(&self, count: usize) -> Vec<Result<Credentials, CreateFailure>> {
        self.create_calls.write().await.push(count);

        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            let index = {
                let mut counter = self.counter.write().await;
                *counter += 1;
                *counter
            };
            let email = format!("user{}@mock.test", index);

            let mut failures = self.failures.write().await;
            if *failures > 0 {
                *failures -= 1;
                results.push(Err(CreateFailure {
                    email,
                    detail: "mock mailbox failure".to_string(),
                }));
            } else {
                results.push(Ok(Credentials::new(email, format!("pw-{}", index))));
            }
        }
        results
    }

    async fn poll_verification_code(
        &self,
        email: &str,
        timeout: Duration,
    ) -> Result<String, EmailError> {
        self.codes
            .read()
            .await
            .get(email)
            .cloned()
            .ok_or_else(|| EmailError::Timeout {
                email: email.to_string(),
                waited_secs: timeout.as_secs(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unique_addresses_across_calls() {
        let mock = MockEmailProvider::new();
        let first = mock.create(2).await;
        let second = mock.create(1).await;

        assert_eq!(first[0].as_ref().unwrap().email, "user1@mock.test");
        assert_eq!(first[1].as_ref().unwrap().email, "user2@mock.test");
        assert_eq!(second[0].as_ref().unwrap().email, "user3@mock.test");
        assert_eq!(mock.create_calls().await, vec![2, 1]);
        assert_eq!(mock.requested().await, 3);
    }

    #[tokio::test]
    async fn test_partial_failure() {
        let mock = MockEmailProvider::new();
        mock.fail_next(1).await;
        let results = mock.create(2).await;
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
    }

    #[tokio::test]
    async fn test_codes() {
        let mock = MockEmailProvider::new();
        mock.set_code("a@mock.test", "123456").await;
        assert_eq!(
            mock.poll_verification_code("a@mock.test", Duration::from_secs(1))
                .await
                .unwrap(),
            "123456"
        );
        assert!(matches!(
            mock.poll_verification_code("b@mock.test", Duration::from_secs(1))
                .await,
            Err(EmailError::Timeout { .. })
        ));
    }
}
