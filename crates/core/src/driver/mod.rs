//! Registration and authorization driver.
//!
//! The driver performs the interactive signup and OAuth login for an
//! identity. The orchestrator only sees the result contract defined here.

mod command;
mod types;

pub use command::{CommandDriver, DriverConfig, EMAIL_ENV, PASSWORD_ENV};
pub use types::{DriverError, DriverErrorKind, RegistrationDriver};
