//! Core tracker data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{AuthTokens, Identity};

// ============================================================================
// Stage / Status / ErrorKind
// ============================================================================

/// Ordered provisioning milestones for a single identity.
///
/// The derived ordering is the pipeline order; a record's stage never moves
/// backwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    EmailCreated,
    Invited,
    Registered,
    Authorized,
    DownstreamRegistered,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::EmailCreated,
        Stage::Invited,
        Stage::Registered,
        Stage::Authorized,
        Stage::DownstreamRegistered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::EmailCreated => "email_created",
            Stage::Invited => "invited",
            Stage::Registered => "registered",
            Stage::Authorized => "authorized",
            Stage::DownstreamRegistered => "downstream_registered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|stage| stage.as_str() == s)
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::EmailCreated => Some(Stage::Invited),
            Stage::Invited => Some(Stage::Registered),
            Stage::Registered => Some(Stage::Authorized),
            Stage::Authorized => Some(Stage::DownstreamRegistered),
            Stage::DownstreamRegistered => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the current attempt at a record's stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Stage not yet attempted.
    Pending,
    /// A worker is executing the stage right now.
    InProgress,
    /// The stage was reached.
    Succeeded,
    /// The stage failed; may be resumed on a later run.
    Failed,
    /// The identity was permanently rejected and is never resumed.
    Abandoned,
}

impl AttemptStatus {
    pub const ALL: [AttemptStatus; 5] = [
        AttemptStatus::Pending,
        AttemptStatus::InProgress,
        AttemptStatus::Succeeded,
        AttemptStatus::Failed,
        AttemptStatus::Abandoned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy shared by every collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network errors and timeouts; retried with backoff.
    Transient,
    /// The verification email never arrived; retried up to its own cap.
    VerificationTimeout,
    /// The external flow refused this identity for good.
    IdentityPoisoned,
    /// The downstream system already holds this identity.
    Duplicate,
    /// The tracker could not persist a write.
    StorageFailure,
    /// A bulk call failed for every member of its batch.
    BulkOperationFailure,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::Transient,
        ErrorKind::VerificationTimeout,
        ErrorKind::IdentityPoisoned,
        ErrorKind::Duplicate,
        ErrorKind::StorageFailure,
        ErrorKind::BulkOperationFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::VerificationTimeout => "verification_timeout",
            ErrorKind::IdentityPoisoned => "identity_poisoned",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::BulkOperationFailure => "bulk_operation_failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Whether a record failed with this kind may be picked up by a later run.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, ErrorKind::IdentityPoisoned)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AttemptRecord
// ============================================================================

/// The current provisioning state of one identity within one team.
///
/// For a succeeded record `stage` is the milestone reached; for any other
/// status it is the milestone being attempted. Transition helpers return a
/// new record so callers can keep the old one until the write is durable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub team_id: String,
    pub email: String,
    /// Mailbox password, needed to resume registration or authorization.
    pub password: String,
    pub stage: Stage,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Identifies the worker session that last wrote the record.
    pub attempt_id: String,
    /// Attempts made at the current stage by the last session.
    pub attempt_count: u32,
    /// Stored once authorization succeeds so the downstream stage can resume.
    #[serde(skip)]
    pub tokens: Option<AuthTokens>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// A fresh pending record at `EmailCreated`.
    pub fn new(
        team_id: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        attempt_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            team_id: team_id.into(),
            email: email.into(),
            password: password.into(),
            stage: Stage::EmailCreated,
            status: AttemptStatus::Pending,
            error_kind: None,
            error_detail: None,
            attempt_id: attempt_id.into(),
            attempt_count: 0,
            tokens: None,
            external_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn for_identity(
        team_id: impl Into<String>,
        identity: &Identity,
        attempt_id: impl Into<String>,
    ) -> Self {
        Self::new(team_id, &identity.email, &identity.password, attempt_id)
    }

    pub fn identity(&self) -> Identity {
        Identity::new(&self.email, &self.password)
    }

    /// Marks `stage` as being executed by `attempt_id`.
    ///
    /// The previous error, if any, is kept so the history shows why a retry
    /// happened.
    pub fn in_progress(&self, stage: Stage, attempt_id: &str, attempt_count: u32) -> Self {
        Self {
            stage,
            status: AttemptStatus::InProgress,
            attempt_id: attempt_id.to_string(),
            attempt_count,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn succeeded(&self, stage: Stage) -> Self {
        Self {
            stage,
            status: AttemptStatus::Succeeded,
            error_kind: None,
            error_detail: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn failed(&self, stage: Stage, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: AttemptStatus::Failed,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn abandoned(&self, stage: Stage, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            stage,
            status: AttemptStatus::Abandoned,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn with_tokens(mut self, tokens: AuthTokens) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_external_reference(mut self, reference: impl Into<String>) -> Self {
        self.external_reference = Some(reference.into());
        self
    }

    /// Fully provisioned: registered with the downstream system.
    pub fn is_completed(&self) -> bool {
        self.stage == Stage::DownstreamRegistered && self.status == AttemptStatus::Succeeded
    }

    /// Completed or abandoned; never written again.
    pub fn is_terminal(&self) -> bool {
        self.is_completed() || self.status == AttemptStatus::Abandoned
    }

    /// The stage the next attempt must execute, or `None` when terminal.
    pub fn next_stage(&self) -> Option<Stage> {
        match self.status {
            AttemptStatus::Succeeded => self.stage.next(),
            AttemptStatus::Abandoned => None,
            AttemptStatus::Pending | AttemptStatus::InProgress | AttemptStatus::Failed => {
                Some(self.stage)
            }
        }
    }

    /// Whether a later run should pick this identity up again.
    ///
    /// Records whose mailbox was never created have nothing to resume.
    pub fn is_resumable(&self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if self.status == AttemptStatus::Failed
            && self.error_kind.is_some_and(|kind| !kind.is_resumable())
        {
            return false;
        }
        matches!(self.next_stage(), Some(stage) if stage > Stage::EmailCreated)
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// Number of records at a given stage and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatusCount {
    pub stage: Stage,
    pub status: AttemptStatus,
    pub count: usize,
}

/// Per-team totals used by status views and exports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamSummary {
    pub team_id: String,
    pub total: usize,
    pub completed: usize,
    pub incomplete: usize,
    pub abandoned: usize,
    pub counts: Vec<StageStatusCount>,
    pub incomplete_accounts: Vec<AttemptRecord>,
}

impl TeamSummary {
    pub fn from_records(team_id: impl Into<String>, records: Vec<AttemptRecord>) -> Self {
        let mut counts: Vec<StageStatusCount> = Vec::new();
        for record in &records {
            match counts
                .iter_mut()
                .find(|c| c.stage == record.stage && c.status == record.status)
            {
                Some(entry) => entry.count += 1,
                None => counts.push(StageStatusCount {
                    stage: record.stage,
                    status: record.status,
                    count: 1,
                }),
            }
        }
        counts.sort_by_key(|c| (c.stage, c.status));

        let total = records.len();
        let completed = records.iter().filter(|r| r.is_completed()).count();
        let abandoned = records
            .iter()
            .filter(|r| r.status == AttemptStatus::Abandoned)
            .count();
        let incomplete_accounts: Vec<AttemptRecord> =
            records.into_iter().filter(|r| !r.is_completed()).collect();

        Self {
            team_id: team_id.into(),
            total,
            completed,
            incomplete: incomplete_accounts.len(),
            abandoned,
            counts,
            incomplete_accounts,
        }
    }

    pub fn count(&self, stage: Stage, status: AttemptStatus) -> usize {
        self.counts
            .iter()
            .find(|c| c.stage == stage && c.status == status)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AttemptRecord {
        AttemptRecord::new("team-a", "x1@example.test", "pw", "attempt-1")
    }

    #[test]
    fn test_stage_ordering() {
        assert!(Stage::EmailCreated < Stage::Invited);
        assert!(Stage::Invited < Stage::Registered);
        assert!(Stage::Registered < Stage::Authorized);
        assert!(Stage::Authorized < Stage::DownstreamRegistered);
        assert_eq!(Stage::DownstreamRegistered.next(), None);
    }

    #[test]
    fn test_string_forms_parse_back() {
        for stage in Stage::ALL {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        for status in AttemptStatus::ALL {
            assert_eq!(AttemptStatus::parse(status.as_str()), Some(status));
        }
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(Stage::parse("bogus"), None);
    }

    #[test]
    fn test_next_stage() {
        let r = record().succeeded(Stage::Invited);
        assert_eq!(r.next_stage(), Some(Stage::Registered));

        let r = record().failed(Stage::Authorized, ErrorKind::Transient, "timeout");
        assert_eq!(r.next_stage(), Some(Stage::Authorized));

        let r = record().succeeded(Stage::DownstreamRegistered);
        assert_eq!(r.next_stage(), None);
        assert!(r.is_completed());

        let r = record().abandoned(Stage::Registered, ErrorKind::IdentityPoisoned, "blocked");
        assert_eq!(r.next_stage(), None);
        assert!(r.is_terminal());
    }

    #[test]
    fn test_resumable() {
        assert!(record()
            .failed(Stage::Authorized, ErrorKind::Transient, "x")
            .is_resumable());
        assert!(record()
            .failed(Stage::Invited, ErrorKind::BulkOperationFailure, "x")
            .is_resumable());
        assert!(record().succeeded(Stage::Invited).is_resumable());
        assert!(record()
            .in_progress(Stage::Registered, "a", 1)
            .is_resumable());

        // Nothing to resume without a mailbox.
        assert!(!record()
            .failed(Stage::EmailCreated, ErrorKind::Transient, "x")
            .is_resumable());
        assert!(!record()
            .failed(Stage::Registered, ErrorKind::IdentityPoisoned, "x")
            .is_resumable());
        assert!(!record()
            .abandoned(Stage::Registered, ErrorKind::IdentityPoisoned, "x")
            .is_resumable());
        assert!(!record()
            .succeeded(Stage::DownstreamRegistered)
            .is_resumable());
    }

    #[test]
    fn test_in_progress_keeps_last_error() {
        let failed = record().failed(Stage::Registered, ErrorKind::Transient, "reset");
        let retry = failed.in_progress(Stage::Registered, "attempt-2", 2);
        assert_eq!(retry.status, AttemptStatus::InProgress);
        assert_eq!(retry.attempt_id, "attempt-2");
        assert_eq!(retry.attempt_count, 2);
        assert_eq!(retry.error_kind, Some(ErrorKind::Transient));

        let done = retry.succeeded(Stage::Registered);
        assert_eq!(done.error_kind, None);
        assert_eq!(done.error_detail, None);
    }

    #[test]
    fn test_summary_counts() {
        let records = vec![
            record().succeeded(Stage::DownstreamRegistered),
            AttemptRecord::new("team-a", "x2@example.test", "pw", "a")
                .succeeded(Stage::DownstreamRegistered),
            AttemptRecord::new("team-a", "x3@example.test", "pw", "a").failed(
                Stage::Authorized,
                ErrorKind::Transient,
                "x",
            ),
            AttemptRecord::new("team-a", "x4@example.test", "pw", "a").abandoned(
                Stage::Registered,
                ErrorKind::IdentityPoisoned,
                "x",
            ),
        ];

        let summary = TeamSummary::from_records("team-a", records);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.incomplete, 2);
        assert_eq!(summary.abandoned, 1);
        assert_eq!(
            summary.count(Stage::DownstreamRegistered, AttemptStatus::Succeeded),
            2
        );
        assert_eq!(summary.count(Stage::Authorized, AttemptStatus::Failed), 1);
        assert_eq!(summary.count(Stage::Invited, AttemptStatus::Failed), 0);
        assert_eq!(summary.incomplete_accounts.len(), 2);
    }

    #[test]
    fn test_record_export_skips_tokens() {
        let r = record()
            .succeeded(Stage::Authorized)
            .with_tokens(AuthTokens {
                access_token: "very-secret".to_string(),
                refresh_token: "r".to_string(),
                id_token: "i".to_string(),
                expires_in: None,
            });
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("very-secret"));
        assert!(json.contains("\"stage\":\"authorized\""));
    }
}
