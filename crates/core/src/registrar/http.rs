//! HTTP client for the registrar's admin API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{Registrar, RegistrarConfig, RegistrarError};
use crate::identity::{AuthTokens, Identity};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddAccountRequest<'a> {
    name: &'a str,
    description: &'a str,
    account_type: &'a str,
    oauth: OauthPayload<'a>,
    priority: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OauthPayload<'a> {
    id_token: &'a str,
    access_token: &'a str,
    refresh_token: &'a str,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Registrar backed by the admin HTTP API.
pub struct HttpRegistrar {
    client: Client,
    config: RegistrarConfig,
}

impl HttpRegistrar {
    /// Create a new registrar client.
    pub fn new(config: RegistrarConfig) -> Result<Self, RegistrarError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn accounts_url(&self) -> String {
        format!("{}/admin/accounts", self.config.api_base.trim_end_matches('/'))
    }

    /// Check that the admin token is accepted. Returns the number of stored accounts.
    pub async fn verify(&self) -> Result<usize, RegistrarError> {
        let response = self
            .client
            .get(self.accounts_url())
            .bearer_auth(&self.config.admin_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistrarError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| RegistrarError::InvalidResponse(e.to_string()))?;

        let count = match parsed.data {
            Some(Value::Array(accounts)) => accounts.len(),
            _ => 0,
        };
        debug!("Registrar reachable, {} account(s) stored", count);
        Ok(count)
    }
}

#[async_trait]
impl Registrar for HttpRegistrar {
    async fn add(&self, identity: &Identity, tokens: &AuthTokens) -> Result<String, RegistrarError> {
        let body = AddAccountRequest {
            name: &identity.email,
            description: "",
            account_type: &self.config.account_type,
            oauth: OauthPayload {
                id_token: &tokens.id_token,
                access_token: &tokens.access_token,
                refresh_token: &tokens.refresh_token,
                expires_in: tokens.expires_in.unwrap_or(self.config.default_expires_in),
            },
            priority: self.config.priority,
        };

        let response = self
            .client
            .post(self.accounts_url())
            .bearer_auth(&self.config.admin_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if status == 409 || is_already_exists(&text) {
            return Err(RegistrarError::Duplicate(identity.email.clone()));
        }
        if !status.is_success() {
            return Err(RegistrarError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| RegistrarError::InvalidResponse(e.to_string()))?;

        if !parsed.success {
            let message = parsed.message.unwrap_or_default();
            if is_already_exists(&message) {
                return Err(RegistrarError::Duplicate(identity.email.clone()));
            }
            return Err(RegistrarError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let id = parsed
            .data
            .as_ref()
            .and_then(|d| d.get("id"))
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| RegistrarError::InvalidResponse("missing data.id".to_string()))?;

        info!("Registered {} downstream as {}", identity.email, id);
        Ok(id)
    }
}

fn is_already_exists(text: &str) -> bool {
    text.to_lowercase().contains("already exists")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registrar(base: &str) -> HttpRegistrar {
        HttpRegistrar::new(RegistrarConfig {
            api_base: base.to_string(),
            admin_token: "admin-secret".to_string(),
            account_type: "shared".to_string(),
            priority: 50,
            default_expires_in: 864_000,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn tokens() -> AuthTokens {
        AuthTokens {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            id_token: "it".to_string(),
            expires_in: None,
        }
    }

    #[tokio::test]
    async fn test_add_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/admin/accounts"))
            .and(header("Authorization", "Bearer admin-secret"))
            .and(body_partial_json(json!({
                "name": "a@x.test",
                "accountType": "shared",
                "oauth": {"accessToken": "at", "expiresIn": 864000},
                "priority": 50
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": {"id": "acc-42"}})),
            )
            .mount(&server)
            .await;

        let id = registrar(&server.uri())
            .add(&Identity::new("a@x.test", "pw"), &tokens())
            .await
            .unwrap();
        assert_eq!(id, "acc-42");
    }

    #[tokio::test]
    async fn test_conflict_is_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let err = registrar(&server.uri())
            .add(&Identity::new("a@x.test", "pw"), &tokens())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrarError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_already_exists_message_is_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"success": false, "message": "Account already exists"}),
            ))
            .mount(&server)
            .await;

        let err = registrar(&server.uri())
            .add(&Identity::new("a@x.test", "pw"), &tokens())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrarError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = registrar(&server.uri())
            .add(&Identity::new("a@x.test", "pw"), &tokens())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::tracker::ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_verify_counts_accounts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/admin/accounts"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "data": [{"id": 1}, {"id": 2}]})),
            )
            .mount(&server)
            .await;

        assert_eq!(registrar(&server.uri()).verify().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_verify_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = registrar(&server.uri()).verify().await.unwrap_err();
        assert!(matches!(err, RegistrarError::Rejected { status: 401, .. }));
    }
}
