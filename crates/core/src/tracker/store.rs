//! Tracker storage trait and write validation.

use std::time::Duration;

use thiserror::Error;

use super::{AttemptRecord, AttemptStatus, Stage, TeamSummary};

/// Error type for tracker operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The backing store failed or is unavailable.
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The write would move an identity back to an earlier stage.
    #[error("stage regression for {team_id}/{email}: {current} -> {attempted}")]
    StageRegression {
        team_id: String,
        email: String,
        current: Stage,
        attempted: Stage,
    },

    /// The identity is completed or abandoned.
    #[error("record {team_id}/{email} is terminal")]
    Terminal { team_id: String, email: String },

    /// Another attempt already holds the identity.
    #[error("record {team_id}/{email} is in progress under attempt {holder}")]
    AttemptConflict {
        team_id: String,
        email: String,
        holder: String,
    },
}

impl TrackerError {
    /// Rejections of an invalid write, as opposed to storage being unavailable.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TrackerError::StageRegression { .. }
                | TrackerError::Terminal { .. }
                | TrackerError::AttemptConflict { .. }
        )
    }
}

/// Durable store of attempt records keyed by `(team_id, email)`.
///
/// Every `put` is durable when it returns `Ok`, and appends to the
/// identity's history.
pub trait AccountTracker: Send + Sync {
    /// Get the current record for an identity.
    fn get(&self, team_id: &str, email: &str) -> Result<Option<AttemptRecord>, TrackerError>;

    /// Atomically validate and upsert a record, appending it to history.
    fn put(&self, record: &AttemptRecord) -> Result<(), TrackerError>;

    /// All current records for a team, oldest first.
    fn list(&self, team_id: &str) -> Result<Vec<AttemptRecord>, TrackerError>;

    /// Current records that are not fully provisioned (abandoned included).
    fn list_incomplete(&self, team_id: &str) -> Result<Vec<AttemptRecord>, TrackerError>;

    /// Every record ever written for an identity, in write order.
    fn history(&self, team_id: &str, email: &str) -> Result<Vec<AttemptRecord>, TrackerError>;

    /// Turn records left in progress by a crashed run into transient failures.
    ///
    /// Only records not written for at least `stale_after` are taken over;
    /// younger ones may belong to a live worker and keep their attempt.
    /// Returns the records as rewritten.
    fn recover_interrupted(
        &self,
        team_id: &str,
        stale_after: Duration,
    ) -> Result<Vec<AttemptRecord>, TrackerError>;

    /// Team ids with at least one record.
    fn team_ids(&self) -> Result<Vec<String>, TrackerError>;

    /// Counts by stage and status for reporting.
    fn summary(&self, team_id: &str) -> Result<TeamSummary, TrackerError> {
        Ok(TeamSummary::from_records(team_id, self.list(team_id)?))
    }
}

/// Check that `next` may replace `current`.
pub fn check_transition(
    current: Option<&AttemptRecord>,
    next: &AttemptRecord,
) -> Result<(), TrackerError> {
    let Some(current) = current else {
        return Ok(());
    };

    if current.is_terminal() {
        return Err(TrackerError::Terminal {
            team_id: next.team_id.clone(),
            email: next.email.clone(),
        });
    }

    if next.stage < current.stage {
        return Err(TrackerError::StageRegression {
            team_id: next.team_id.clone(),
            email: next.email.clone(),
            current: current.stage,
            attempted: next.stage,
        });
    }

    if current.status == AttemptStatus::InProgress && current.attempt_id != next.attempt_id {
        return Err(TrackerError::AttemptConflict {
            team_id: next.team_id.clone(),
            email: next.email.clone(),
            holder: current.attempt_id.clone(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::ErrorKind;

    fn base() -> AttemptRecord {
        AttemptRecord::new("t", "e@x.test", "pw", "attempt-1")
    }

    #[test]
    fn test_first_write_always_allowed() {
        assert!(check_transition(None, &base()).is_ok());
    }

    #[test]
    fn test_forward_and_same_stage_allowed() {
        let current = base().succeeded(Stage::Invited);
        assert!(check_transition(Some(&current), &current.in_progress(Stage::Registered, "a2", 1)).is_ok());

        let failed = base().failed(Stage::Registered, ErrorKind::Transient, "x");
        assert!(check_transition(Some(&failed), &failed.in_progress(Stage::Registered, "a2", 1)).is_ok());
    }

    #[test]
    fn test_regression_rejected() {
        let current = base().succeeded(Stage::Authorized);
        let result = check_transition(Some(&current), &current.in_progress(Stage::Registered, "a2", 1));
        assert!(matches!(result, Err(TrackerError::StageRegression { .. })));
    }

    #[test]
    fn test_terminal_rejected() {
        let done = base().succeeded(Stage::DownstreamRegistered);
        let result = check_transition(Some(&done), &done.succeeded(Stage::DownstreamRegistered));
        assert!(matches!(result, Err(TrackerError::Terminal { .. })));

        let abandoned = base().abandoned(Stage::Registered, ErrorKind::IdentityPoisoned, "x");
        let result = check_transition(Some(&abandoned), &abandoned.in_progress(Stage::Registered, "a2", 1));
        assert!(matches!(result, Err(TrackerError::Terminal { .. })));
    }

    #[test]
    fn test_second_active_attempt_rejected() {
        let held = base().in_progress(Stage::Registered, "holder", 1);
        let result = check_transition(Some(&held), &held.in_progress(Stage::Registered, "intruder", 1));
        match result {
            Err(TrackerError::AttemptConflict { holder, .. }) => assert_eq!(holder, "holder"),
            other => panic!("expected conflict, got {:?}", other),
        }

        // The holder itself may keep writing.
        assert!(check_transition(Some(&held), &held.succeeded(Stage::Registered)).is_ok());
    }

    #[test]
    fn test_error_classification() {
        assert!(!TrackerError::Database("down".into()).is_rejection());
        assert!(TrackerError::Terminal {
            team_id: "t".into(),
            email: "e".into()
        }
        .is_rejection());
    }
}
