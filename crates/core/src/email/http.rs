//! HTTP client for the mailbox admin API.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CreateFailure, EmailConfig, EmailError, EmailProvider};
use crate::identity::Credentials;

const LOCAL_PART_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const PASSWORD_CHARS: &[u8] = b"abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Code patterns tried against a mail subject, most specific first.
const CODE_PATTERNS: &[&str] = &[
    r"(?i)code is\s*(\d{6})",
    r"代码为\s*(\d{6})",
    r"\b(\d{6})\b",
];

static CODE_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    CODE_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

#[derive(Debug, Serialize)]
struct AddUserRequest<'a> {
    list: Vec<AddUserEntry<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddUserEntry<'a> {
    email: &'a str,
    password: &'a str,
    role_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailListRequest<'a> {
    to_email: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct MailSummary {
    #[serde(default)]
    subject: String,
}

/// Mailbox provider backed by the mail admin HTTP API.
pub struct HttpEmailProvider {
    client: Client,
    config: EmailConfig,
}

impl HttpEmailProvider {
    /// Create a new provider.
    pub fn new(config: EmailConfig) -> Result<Self, EmailError> {
        if config.api_base.trim().is_empty() {
            return Err(EmailError::NotConfigured("api_base is required".to_string()));
        }
        if config.domains.is_empty() {
            return Err(EmailError::NotConfigured(
                "at least one domain is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Random address on one of the configured domains.
    pub fn generate_address(&self) -> String {
        let local: String = (0..8)
            .map(|_| LOCAL_PART_CHARS[fastrand::usize(..LOCAL_PART_CHARS.len())] as char)
            .collect();
        let domain = &self.config.domains[fastrand::usize(..self.config.domains.len())];
        format!("{}{}@{}", local, self.config.local_part_suffix, domain)
    }

    fn password(&self) -> String {
        match &self.config.default_password {
            Some(password) => password.clone(),
            None => (0..16)
                .map(|_| PASSWORD_CHARS[fastrand::usize(..PASSWORD_CHARS.len())] as char)
                .collect(),
        }
    }

    async fn add_user(&self, email: &str, password: &str) -> Result<(), EmailError> {
        let body = AddUserRequest {
            list: vec![AddUserEntry {
                email,
                password,
                role_name: &self.config.role,
            }],
        };

        let response = self
            .client
            .post(self.url("addUser"))
            .header("Authorization", &self.config.api_auth)
            .json(&body)
            .send()
            .await?;

        let parsed: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| EmailError::Parse(format!("addUser response: {}", e)))?;

        let message = parsed.message.unwrap_or_default();
        if parsed.code == 200 || is_already_exists(&message) {
            Ok(())
        } else {
            Err(EmailError::Api {
                code: parsed.code,
                message,
            })
        }
    }

    async fn latest_subject(&self, email: &str) -> Result<Option<String>, EmailError> {
        let response = self
            .client
            .post(self.url("emailList"))
            .header("Authorization", &self.config.api_auth)
            .json(&EmailListRequest { to_email: email })
            .send()
            .await?;

        let parsed: ApiResponse<Vec<MailSummary>> = response
            .json()
            .await
            .map_err(|e| EmailError::Parse(format!("emailList response: {}", e)))?;

        if parsed.code != 200 {
            return Err(EmailError::Api {
                code: parsed.code,
                message: parsed.message.unwrap_or_default(),
            });
        }

        Ok(parsed
            .data
            .and_then(|mails| mails.into_iter().next())
            .map(|mail| mail.subject))
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    async fn create(&self, count: usize) -> Vec<Result<Credentials, CreateFailure>> {
        let mut results = Vec::with_capacity(count);

        for _ in 0..count {
            let email = self.generate_address();
            let password = self.password();

            match self.add_user(&email, &password).await {
                Ok(()) => {
                    info!("Created mailbox {}", email);
                    results.push(Ok(Credentials::new(email, password)));
                }
                Err(e) => {
                    warn!("Failed to create mailbox {}: {}", email, e);
                    results.push(Err(CreateFailure {
                        email,
                        detail: e.to_string(),
                    }));
                }
            }
        }

        let created = results.iter().filter(|r| r.is_ok()).count();
        info!("Mailbox creation finished: {}/{}", created, count);
        results
    }

    async fn poll_verification_code(
        &self,
        email: &str,
        timeout: Duration,
    ) -> Result<String, EmailError> {
        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            match self.latest_subject(email).await {
                Ok(Some(subject)) => {
                    if let Some(code) = extract_code(&subject) {
                        debug!("Verification code for {} found", email);
                        return Ok(code);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Inbox poll for {} failed: {}", email, e),
            }

            if Instant::now() + interval > deadline {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        Err(EmailError::Timeout {
            email: email.to_string(),
            waited_secs: started.elapsed().as_secs(),
        })
    }
}

/// Pull a six-digit verification code out of a mail subject.
pub fn extract_code(subject: &str) -> Option<String> {
    CODE_REGEXES.iter().find_map(|re| {
        re.captures(subject)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn is_already_exists(message: &str) -> bool {
    message.to_lowercase().contains("exist") || message.contains("已存在")
}
