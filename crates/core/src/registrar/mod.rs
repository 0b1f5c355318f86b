//! Downstream system of record for authorized credentials.

mod http;
mod types;

pub use http::HttpRegistrar;
pub use types::{Registrar, RegistrarConfig, RegistrarError};
