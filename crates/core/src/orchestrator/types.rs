//! Types for the provisioning orchestrator.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::tracker::{AttemptRecord, AttemptStatus, ErrorKind, Stage, TrackerError};

/// Errors that stop a team's processing.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The tracker could not persist or read state.
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// A team filter named a team that is not in the registry.
    #[error("unknown team: {0}")]
    UnknownTeam(String),
}

/// How an identity left this run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Registered downstream.
    Completed,
    /// Failed at some stage; a later run may resume it.
    Failed,
    /// Permanently rejected.
    Abandoned,
    /// Held by another attempt; left untouched.
    Skipped,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Completed => "completed",
            Disposition::Failed => "failed",
            Disposition::Abandoned => "abandoned",
            Disposition::Skipped => "skipped",
        }
    }
}

/// Final state of one identity touched during a run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IdentityOutcome {
    pub email: String,
    pub stage: Stage,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
    pub disposition: Disposition,
}

impl IdentityOutcome {
    pub fn from_record(record: &AttemptRecord, disposition: Disposition) -> Self {
        Self {
            email: record.email.clone(),
            stage: record.stage,
            status: record.status,
            error_kind: record.error_kind,
            error_detail: record.error_detail.clone(),
            external_reference: record.external_reference.clone(),
            disposition,
        }
    }

    /// Disposition implied by the record's current state.
    pub fn settled(record: &AttemptRecord) -> Self {
        let disposition = if record.is_completed() {
            Disposition::Completed
        } else if record.status == AttemptStatus::Abandoned {
            Disposition::Abandoned
        } else {
            Disposition::Failed
        };
        Self::from_record(record, disposition)
    }
}

/// What happened to one team during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeamReport {
    pub team_id: String,
    /// Requested number of provisioned identities.
    pub target: usize,
    /// Identities already provisioned before this run.
    pub already_completed: usize,
    /// Incomplete identities picked up from earlier runs.
    pub resumed: usize,
    /// New mailboxes created.
    pub created: usize,
    pub creation_failed: usize,
    pub invited: usize,
    pub invite_failed: usize,
    pub completed: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub skipped: usize,
    /// Free seats reported by the team before creating identities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seats_available: Option<usize>,
    /// Set when cancellation stopped the team early.
    pub cancelled: bool,
    /// Identities left unprocessed because of cancellation.
    pub not_started: usize,
    pub outcomes: Vec<IdentityOutcome>,
}

impl TeamReport {
    pub fn new(team_id: impl Into<String>, target: usize) -> Self {
        Self {
            team_id: team_id.into(),
            target,
            ..Self::default()
        }
    }

    /// Count an outcome under its disposition.
    pub fn record(&mut self, outcome: IdentityOutcome) {
        match outcome.disposition {
            Disposition::Completed => self.completed += 1,
            Disposition::Failed => self.failed += 1,
            Disposition::Abandoned => self.abandoned += 1,
            Disposition::Skipped => self.skipped += 1,
        }
        self.outcomes.push(outcome);
    }

    /// Provisioned identities for the team after this run.
    pub fn total_completed(&self) -> usize {
        self.already_completed + self.completed
    }

    pub fn target_met(&self) -> bool {
        self.total_completed() >= self.target
    }
}

/// Result of one team within a run.
#[derive(Debug, Clone, Serialize)]
pub struct TeamRunResult {
    pub team_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<TeamReport>,
    /// Set when the whole team failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TeamRunResult {
    pub fn completed(report: TeamReport) -> Self {
        Self {
            team_id: report.team_id.clone(),
            report: Some(report),
            error: None,
        }
    }

    pub fn failed(team_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            report: None,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of the owner pass for one team.
#[derive(Debug, Clone, Serialize)]
pub struct OwnerResult {
    pub team_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<IdentityOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub teams: Vec<TeamRunResult>,
    /// Owner accounts processed after the member phase.
    pub owners: Vec<OwnerResult>,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            teams: Vec::new(),
            owners: Vec::new(),
            cancelled: false,
        }
    }

    pub fn failed_teams(&self) -> usize {
        self.teams.iter().filter(|t| !t.is_ok()).count()
    }

    /// Identities provisioned during this run across all teams.
    pub fn completed_identities(&self) -> usize {
        self.teams
            .iter()
            .filter_map(|t| t.report.as_ref())
            .map(|r| r.completed)
            .sum()
    }

    /// Log the per-team result table.
    pub fn log(&self) {
        info!("Run {} summary:", self.run_id);
        for team in &self.teams {
            match (&team.report, &team.error) {
                (Some(report), _) => {
                    info!(
                        "  {}: {}/{} provisioned ({} new, {} failed, {} abandoned, {} skipped, {} creation failures, {} invite failures)",
                        report.team_id,
                        report.total_completed(),
                        report.target,
                        report.completed,
                        report.failed,
                        report.abandoned,
                        report.skipped,
                        report.creation_failed,
                        report.invite_failed,
                    );
                    for outcome in report
                        .outcomes
                        .iter()
                        .filter(|o| o.disposition != Disposition::Completed)
                    {
                        warn!(
                            "    {} {} at {} ({})",
                            outcome.email,
                            outcome.disposition.as_str(),
                            outcome.stage,
                            outcome.error_detail.as_deref().unwrap_or("-")
                        );
                    }
                }
                (None, Some(err)) => error!("  {}: failed: {}", team.team_id, err),
                (None, None) => {}
            }
        }
        for owner in &self.owners {
            match (&owner.outcome, &owner.error) {
                (Some(outcome), _) => info!(
                    "  {} owner {}: {} at {}",
                    owner.team_id,
                    outcome.email,
                    outcome.disposition.as_str(),
                    outcome.stage
                ),
                (None, Some(err)) => error!("  {} owner: failed: {}", owner.team_id, err),
                (None, None) => {}
            }
        }
        if self.cancelled {
            warn!("Run was cancelled before all teams finished");
        }
    }
}
