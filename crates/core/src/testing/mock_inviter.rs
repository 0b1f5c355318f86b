//! Mock team inviter for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::invite::{InviteError, InviteOutcome, InviteRejection, TeamInviter};
use crate::team::Team;

/// A recorded invite call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedInvite {
    pub team_id: String,
    pub emails: Vec<String>,
}

/// Mock implementation of the TeamInviter trait.
///
/// Accepts every address unless told otherwise:
/// - `set_next_error` fails the next whole batch
/// - `reject` refuses one address in every batch it appears in
/// - `set_available_seats` reports a seat limit (unknown by default)
#[derive(Debug)]
pub struct MockTeamInviter {
    calls: Arc<RwLock<Vec<RecordedInvite>>>,
    next_error: Arc<RwLock<Option<String>>>,
    rejected: Arc<RwLock<HashMap<String, String>>>,
    seats: Arc<RwLock<Option<usize>>>,
    seat_error: Arc<RwLock<Option<String>>>,
    seat_queries: Arc<RwLock<usize>>,
}

impl Default for MockTeamInviter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTeamInviter {
    /// Create a new mock inviter.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            rejected: Arc::new(RwLock::new(HashMap::new())),
            seats: Arc::new(RwLock::new(None)),
            seat_error: Arc::new(RwLock::new(None)),
            seat_queries: Arc::new(RwLock::new(0)),
        }
    }

    /// Report `seats` free seats; accepted invites use them up.
    pub async fn set_available_seats(&self, seats: Option<usize>) {
        *self.seats.write().await = seats;
    }

    /// Fail every seat query.
    pub async fn fail_seat_queries(&self, message: &str) {
        *self.seat_error.write().await = Some(message.to_string());
    }

    pub async fn seat_query_count(&self) -> usize {
        *self.seat_queries.read().await
    }

    /// Fail the next batch as a whole.
    pub async fn set_next_error(&self, message: &str) {
        *self.next_error.write().await = Some(message.to_string());
    }

    /// Refuse `email` individually.
    pub async fn reject(&self, email: &str, reason: &str) {
        self.rejected
            .write()
            .await
            .insert(email.to_string(), reason.to_string());
    }

    /// Get all recorded invite calls.
    pub async fn recorded_invites(&self) -> Vec<RecordedInvite> {
        self.calls.read().await.clone()
    }

    /// Get the number of invite calls made.
    pub async fn invite_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl TeamInviter for MockTeamInviter {
    async fn invite(&self, team: &Team, emails: &[String]) -> Result<InviteOutcome, InviteError> {
        self.calls.write().await.push(RecordedInvite {
            team_id: team.id.clone(),
            emails: emails.to_vec(),
        });

        if let Some(message) = self.next_error.write().await.take() {
            return Err(InviteError::Api {
                status: 500,
                message,
            });
        }

        let rejected_map = self.rejected.read().await;
        let mut outcome = InviteOutcome::default();
        for email in emails {
            match rejected_map.get(email) {
                Some(reason) => outcome.rejected.push(InviteRejection {
                    email: email.clone(),
                    reason: reason.clone(),
                }),
                None => outcome.invited.push(email.clone()),
            }
        }

        if let Some(seats) = self.seats.write().await.as_mut() {
            *seats = seats.saturating_sub(outcome.invited.len());
        }
        Ok(outcome)
    }

    async fn available_seats(&self, _team: &Team) -> Result<Option<usize>, InviteError> {
        *self.seat_queries.write().await += 1;
        if let Some(message) = self.seat_error.read().await.clone() {
            return Err(InviteError::Api {
                status: 503,
                message,
            });
        }
        Ok(*self.seats.read().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_records_batches_and_rejections() {
        let mock = MockTeamInviter::new();
        mock.reject("b@mock.test", "seat limit").await;

        let emails = vec!["a@mock.test".to_string(), "b@mock.test".to_string()];
        let outcome = mock.invite(&fixtures::team("alpha"), &emails).await.unwrap();

        assert!(outcome.is_invited("a@mock.test"));
        assert_eq!(outcome.rejection("b@mock.test").unwrap().reason, "seat limit");

        let calls = mock.recorded_invites().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].team_id, "alpha");
        assert_eq!(calls[0].emails, emails);
    }

    #[tokio::test]
    async fn test_next_error_is_consumed() {
        let mock = MockTeamInviter::new();
        mock.set_next_error("upstream down").await;
        let team = fixtures::team("alpha");
        let emails = vec!["a@mock.test".to_string()];

        assert!(mock.invite(&team, &emails).await.is_err());
        assert!(mock.invite(&team, &emails).await.is_ok());
        assert_eq!(mock.invite_count().await, 2);
    }

    #[tokio::test]
    async fn test_seats_are_consumed_by_invites() {
        let mock = MockTeamInviter::new();
        let team = fixtures::team("alpha");
        assert_eq!(mock.available_seats(&team).await.unwrap(), None);

        mock.set_available_seats(Some(3)).await;
        let emails = vec!["a@mock.test".to_string(), "b@mock.test".to_string()];
        mock.invite(&team, &emails).await.unwrap();
        assert_eq!(mock.available_seats(&team).await.unwrap(), Some(1));

        mock.fail_seat_queries("billing down").await;
        assert!(mock.available_seats(&team).await.is_err());
        assert_eq!(mock.seat_query_count().await, 3);
    }
}
