//! Durable progress tracking for provisioned identities.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteAccountTracker;
pub use store::{check_transition, AccountTracker, TrackerError};
pub use types::{AttemptRecord, AttemptStatus, ErrorKind, Stage, StageStatusCount, TeamSummary};
