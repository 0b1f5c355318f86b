//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of every collaborator trait,
//! plus a tracker wrapper for injecting storage failures, so the
//! orchestrator can be exercised end to end without real services.
//!
//! # Example
//!
//! ```rust,ignore
//! use teamprov_core::testing::{fixtures, DriverAction, MockServices};
//! use teamprov_core::driver::DriverError;
//!
//! let services = MockServices::new();
//! services
//!     .driver
//!     .fail_always(DriverAction::Register, None, DriverError::transient("down"))
//!     .await;
//!
//! let orchestrator = StageOrchestrator::new(tracker, services.collaborators());
//! ```

mod flaky_tracker;
mod mock_driver;
mod mock_email;
mod mock_inviter;
mod mock_registrar;

pub use flaky_tracker::FlakyTracker;
pub use mock_driver::{mock_tokens, DriverAction, MockRegistrationDriver, RecordedDriverCall};
pub use mock_email::MockEmailProvider;
pub use mock_inviter::{MockTeamInviter, RecordedInvite};
pub use mock_registrar::{MockRegistrar, RecordedRegistration};

use std::sync::Arc;

use crate::orchestrator::Collaborators;

/// One mock of each collaborator, kept typed for assertions.
#[derive(Clone)]
pub struct MockServices {
    pub email: Arc<MockEmailProvider>,
    pub inviter: Arc<MockTeamInviter>,
    pub driver: Arc<MockRegistrationDriver>,
    pub registrar: Arc<MockRegistrar>,
}

impl Default for MockServices {
    fn default() -> Self {
        Self::new()
    }
}

impl MockServices {
    pub fn new() -> Self {
        Self {
            email: Arc::new(MockEmailProvider::new()),
            inviter: Arc::new(MockTeamInviter::new()),
            driver: Arc::new(MockRegistrationDriver::new()),
            registrar: Arc::new(MockRegistrar::new()),
        }
    }

    /// The same mocks as trait objects for the orchestrator.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            email: self.email.clone(),
            inviter: self.inviter.clone(),
            driver: self.driver.clone(),
            registrar: self.registrar.clone(),
        }
    }
}

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::team::{Team, TeamError, TeamRegistry};
    use crate::tracker::{AttemptRecord, ErrorKind, Stage};

    use super::mock_tokens;

    /// Create a test team with reasonable defaults.
    pub fn team(id: &str) -> Team {
        Team {
            id: id.to_string(),
            display_name: format!("Team {}", id),
            bearer_credential: format!("bearer-{}", id),
            account_reference: format!("account-{}", id),
            organization_id: None,
        }
    }

    /// Test team whose owner account is `owner`.
    pub fn team_with_owner(id: &str, owner: &str) -> Team {
        Team {
            display_name: owner.to_string(),
            ..team(id)
        }
    }

    /// Registry holding one test team per id, in order.
    pub fn registry(ids: &[&str]) -> Result<TeamRegistry, TeamError> {
        TeamRegistry::from_teams(ids.iter().map(|id| team(id)).collect())
    }

    /// Record that reached `stage` successfully.
    pub fn succeeded_at(team_id: &str, email: &str, stage: Stage) -> AttemptRecord {
        let record = AttemptRecord::new(team_id, email, "pw-fixture", "fixture-run").succeeded(stage);
        if stage >= Stage::Authorized {
            record.with_tokens(mock_tokens(email))
        } else {
            record
        }
    }

    /// Record that failed while attempting `stage`.
    pub fn failed_at(team_id: &str, email: &str, stage: Stage, kind: ErrorKind) -> AttemptRecord {
        AttemptRecord::new(team_id, email, "pw-fixture", "fixture-run").failed(
            stage,
            kind,
            "fixture failure",
        )
    }

    /// Record left in progress by another attempt, last written `age` ago.
    pub fn in_progress_at(
        team_id: &str,
        email: &str,
        stage: Stage,
        attempt_id: &str,
        age: chrono::Duration,
    ) -> AttemptRecord {
        let mut record = AttemptRecord::new(team_id, email, "pw-fixture", "fixture-run")
            .in_progress(stage, attempt_id, 1);
        record.updated_at = record.updated_at - age;
        record
    }

    /// Fully provisioned record.
    pub fn completed(team_id: &str, email: &str) -> AttemptRecord {
        succeeded_at(team_id, email, Stage::DownstreamRegistered)
            .with_external_reference(format!("ref-{}", email))
    }
}
