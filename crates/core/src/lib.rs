pub mod config;
pub mod driver;
pub mod email;
pub mod identity;
pub mod invite;
pub mod metrics;
pub mod orchestrator;
pub mod registrar;
pub mod report;
pub mod retry;
pub mod team;
pub mod testing;
pub mod tracker;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use identity::{AuthTokens, Credentials, Identity};
pub use orchestrator::{
    CancellationToken, Collaborators, RunContext, RunController, RunSummary, StageOrchestrator,
    TeamReport,
};
pub use retry::RetryPolicy;
pub use team::{Team, TeamRegistry};
pub use tracker::{AccountTracker, AttemptRecord, AttemptStatus, ErrorKind, SqliteAccountTracker, Stage};
