//! Provisioning orchestrator.
//!
//! Drives identities of one team through their stages and teams through a run:
//! - **StageOrchestrator**: create, bulk invite, then per-identity
//!   register / authorize / downstream registration, persisting every transition
//! - **RunController**: sequential loop over teams with pacing and cancellation,
//!   followed by an optional pass over team owner accounts
//!
//! Everything runs on a single logical worker; the registration driver is an
//! exclusive resource.

mod config;
mod context;
mod controller;
mod pacing;
mod runner;
mod types;

pub use config::{PacingConfig, RunConfig};
pub use context::{CancellationToken, RunContext};
pub use controller::RunController;
pub use pacing::Pacer;
pub use runner::{Collaborators, StageOrchestrator};
pub use types::{
    Disposition, IdentityOutcome, OrchestratorError, OwnerResult, RunSummary, TeamReport,
    TeamRunResult,
};
