//! Disposable mailbox provisioning and verification-code retrieval.

mod http;
mod types;

pub use http::{extract_code, HttpEmailProvider};
pub use types::{CreateFailure, EmailConfig, EmailError, EmailProvider};
