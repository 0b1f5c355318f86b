//! Mock registration driver for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::driver::{DriverError, RegistrationDriver};
use crate::identity::{AuthTokens, Identity};

/// Which driver entry point was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverAction {
    Register,
    Authorize,
}

/// A recorded driver call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDriverCall {
    pub action: DriverAction,
    pub email: String,
}

#[derive(Debug, Clone)]
struct ScriptedFailure {
    error: DriverError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

type FailureKey = (DriverAction, Option<String>);

/// Mock implementation of the RegistrationDriver trait.
///
/// Succeeds by default; authorization returns tokens derived from the
/// address (`access-{email}`). Failures are scripted per action, either for
/// one address or for every address (`email = None`). A per-address script
/// wins over the catch-all one.
#[derive(Debug)]
pub struct MockRegistrationDriver {
    calls: Arc<RwLock<Vec<RecordedDriverCall>>>,
    failures: Arc<RwLock<HashMap<FailureKey, ScriptedFailure>>>,
}

impl Default for MockRegistrationDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistrationDriver {
    /// Create a new mock driver.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fail every call to `action` (for `email`, or for everyone).
    pub async fn fail_always(&self, action: DriverAction, email: Option<&str>, error: DriverError) {
        self.script(action, email, error, None).await;
    }

    /// Fail the next `times` calls to `action`, then succeed.
    pub async fn fail_times(
        &self,
        action: DriverAction,
        email: Option<&str>,
        times: u32,
        error: DriverError,
    ) {
        self.script(action, email, error, Some(times)).await;
    }

    async fn script(
        &self,
        action: DriverAction,
        email: Option<&str>,
        error: DriverError,
        remaining: Option<u32>,
    ) {
        self.failures.write().await.insert(
            (action, email.map(str::to_string)),
            ScriptedFailure { error, remaining },
        );
    }

    /// Get all recorded calls.
    pub async fn recorded_calls(&self) -> Vec<RecordedDriverCall> {
        self.calls.read().await.clone()
    }

    /// Number of calls to `action`.
    pub async fn call_count(&self, action: DriverAction) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.action == action)
            .count()
    }

    /// Number of calls to `action` for one address.
    pub async fn calls_for(&self, action: DriverAction, email: &str) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|c| c.action == action && c.email == email)
            .count()
    }

    async fn record(&self, action: DriverAction, email: &str) -> Result<(), DriverError> {
        self.calls.write().await.push(RecordedDriverCall {
            action,
            email: email.to_string(),
        });

        let mut failures = self.failures.write().await;
        let specific = (action, Some(email.to_string()));
        let key = if failures.contains_key(&specific) {
            specific
        } else {
            (action, None)
        };

        let Some(failure) = failures.get_mut(&key) else {
            return Ok(());
        };
        match failure.remaining {
            None => Err(failure.error.clone()),
            Some(0) => Ok(()),
            Some(ref mut n) => {
                *n -= 1;
                Err(failure.error.clone())
            }
        }
    }
}

/// Tokens the mock returns for `email`.
pub fn mock_tokens(email: &str) -> AuthTokens {
    AuthTokens {
        access_token: format!("access-{}", email),
        refresh_token: format!("refresh-{}", email),
        id_token: format!("id-{}", email),
        expires_in: Some(3600),
    }
}

#[async_trait]
impl RegistrationDriver for MockRegistrationDriver {
    async fn register(&self, identity: &Identity) -> Result<(), DriverError> {
        self.record(DriverAction::Register, &identity.email).await
    }

    async fn authorize(&self, identity: &Identity) -> Result<AuthTokens, DriverError> {
        self.record(DriverAction::Authorize, &identity.email).await?;
        Ok(mock_tokens(&identity.email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_succeeds_by_default() {
        let mock = MockRegistrationDriver::new();
        let identity = Identity::new("a@mock.test", "pw");

        mock.register(&identity).await.unwrap();
        let tokens = mock.authorize(&identity).await.unwrap();
        assert_eq!(tokens.access_token, "access-a@mock.test");
        assert_eq!(mock.call_count(DriverAction::Register).await, 1);
        assert_eq!(mock.call_count(DriverAction::Authorize).await, 1);
    }

    #[tokio::test]
    async fn test_fail_times_then_succeed() {
        let mock = MockRegistrationDriver::new();
        mock.fail_times(
            DriverAction::Register,
            None,
            2,
            DriverError::transient("flaky"),
        )
        .await;
        let identity = Identity::new("a@mock.test", "pw");

        assert!(mock.register(&identity).await.is_err());
        assert!(mock.register(&identity).await.is_err());
        assert!(mock.register(&identity).await.is_ok());
    }

    #[tokio::test]
    async fn test_specific_address_overrides_catch_all() {
        let mock = MockRegistrationDriver::new();
        mock.fail_always(
            DriverAction::Register,
            Some("bad@mock.test"),
            DriverError::ui_rejected("blocked"),
        )
        .await;

        let bad = Identity::new("bad@mock.test", "pw");
        let good = Identity::new("good@mock.test", "pw");
        let err = mock.register(&bad).await.unwrap_err();
        assert_eq!(err, DriverError::ui_rejected("blocked"));
        assert!(mock.register(&good).await.is_ok());
        assert_eq!(mock.calls_for(DriverAction::Register, "bad@mock.test").await, 1);
    }
}
