//! Pre-authorized teams that receive invited identities.

mod registry;
mod types;

pub use registry::TeamRegistry;
pub use types::{Team, TeamError};
