//! Bounded retry with exponential backoff and failure classification.

mod config;
mod policy;

pub use config::{PolicyConfig, RetryConfig, UiRejectedAction};
pub use policy::RetryPolicy;
