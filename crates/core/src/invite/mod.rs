//! Bulk invitation of identities into a team.

mod http;
mod types;

pub use http::HttpTeamInviter;
pub use types::{InviteConfig, InviteError, InviteOutcome, InviteRejection, TeamInviter};
