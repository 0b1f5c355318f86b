//! HTTP client for the team invite endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{InviteConfig, InviteError, InviteOutcome, InviteRejection, TeamInviter};
use crate::team::Team;

#[derive(Debug, Serialize)]
struct InviteRequest<'a> {
    email_addresses: &'a [String],
    role: &'a str,
    resend_emails: bool,
}

#[derive(Debug, Default, Deserialize)]
struct InviteResponse {
    #[serde(default)]
    errored_emails: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    #[serde(default)]
    seats_entitled: usize,
    #[serde(default)]
    seats_in_use: usize,
}

#[derive(Debug, Deserialize)]
struct PendingInvitesResponse {
    #[serde(default)]
    total: usize,
}

/// Team inviter backed by the team's HTTP API.
pub struct HttpTeamInviter {
    client: Client,
    config: InviteConfig,
}

impl HttpTeamInviter {
    /// Create a new inviter.
    pub fn new(config: InviteConfig) -> Result<Self, InviteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        team: &Team,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, InviteError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&team.bearer_credential)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == 401 || status == 403 {
            return Err(InviteError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InviteError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| InviteError::Parse(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl TeamInviter for HttpTeamInviter {
    async fn invite(&self, team: &Team, emails: &[String]) -> Result<InviteOutcome, InviteError> {
        if emails.is_empty() {
            return Ok(InviteOutcome::default());
        }

        let url = format!("{}/accounts/{}/invites", self.base(), team.account_reference);

        debug!("Inviting {} address(es) into team {}", emails.len(), team.id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&team.bearer_credential)
            .json(&InviteRequest {
                email_addresses: emails,
                role: &self.config.role,
                resend_emails: true,
            })
            .send()
            .await?;

        let status = response.status();
        if status == 401 || status == 403 {
            return Err(InviteError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InviteError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let text = response.text().await?;
        let parsed: InviteResponse = if text.trim().is_empty() {
            InviteResponse::default()
        } else {
            serde_json::from_str(&text)
                .map_err(|e| InviteError::Parse(format!("invite response: {}", e)))?
        };

        let rejected: Vec<InviteRejection> = parsed
            .errored_emails
            .iter()
            .filter_map(|entry| parse_rejection(entry, emails))
            .collect();

        let invited: Vec<String> = emails
            .iter()
            .filter(|e| !rejected.iter().any(|r| &r.email == *e))
            .cloned()
            .collect();

        for rejection in &rejected {
            warn!(
                "Team {} refused {}: {}",
                team.id, rejection.email, rejection.reason
            );
        }
        info!(
            "Invited {}/{} address(es) into team {}",
            invited.len(),
            emails.len(),
            team.id
        );

        Ok(InviteOutcome { invited, rejected })
    }

    async fn available_seats(&self, team: &Team) -> Result<Option<usize>, InviteError> {
        if !self.config.check_seats {
            return Ok(None);
        }

        let subscription: SubscriptionResponse = self
            .get_json(
                team,
                &format!("{}/subscriptions", self.base()),
                &[("account_id", team.account_reference.as_str())],
            )
            .await?;
        let pending: PendingInvitesResponse = self
            .get_json(
                team,
                &format!("{}/accounts/{}/invites", self.base(), team.account_reference),
                &[("offset", "0"), ("limit", "1"), ("query", "")],
            )
            .await?;

        let available = subscription
            .seats_entitled
            .saturating_sub(subscription.seats_in_use)
            .saturating_sub(pending.total);
        debug!(
            "Team {}: {} entitled, {} in use, {} pending -> {} free",
            team.id,
            subscription.seats_entitled,
            subscription.seats_in_use,
            pending.total,
            available
        );
        Ok(Some(available))
    }
}

/// Entries are either bare addresses or objects naming the address and error.
fn parse_rejection(entry: &Value, requested: &[String]) -> Option<InviteRejection> {
    let (email, reason) = match entry {
        Value::String(email) => (email.clone(), "rejected".to_string()),
        Value::Object(map) => {
            let email = ["email", "email_address"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))?
                .to_string();
            let reason = ["error", "error_code", "message"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .unwrap_or("rejected")
                .to_string();
            (email, reason)
        }
        _ => return None,
    };

    requested
        .iter()
        .find(|r| r.eq_ignore_ascii_case(&email))
        .map(|r| InviteRejection {
            email: r.clone(),
            reason,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn team() -> Team {
        Team {
            id: "alpha".to_string(),
            display_name: "alpha@corp.test".to_string(),
            bearer_credential: "team-token".to_string(),
            account_reference: "acct-1".to_string(),
            organization_id: None,
        }
    }

    fn inviter(base: &str) -> HttpTeamInviter {
        HttpTeamInviter::new(InviteConfig {
            api_base: base.to_string(),
            role: "standard-user".to_string(),
            timeout_secs: 5,
            check_seats: true,
        })
        .unwrap()
    }

    fn emails() -> Vec<String> {
        vec!["a@x.test".to_string(), "b@x.test".to_string()]
    }

    #[test]
    fn test_parse_rejection_shapes() {
        let requested = emails();
        let r = parse_rejection(&json!("B@x.test"), &requested).unwrap();
        assert_eq!(r.email, "b@x.test");

        let r = parse_rejection(&json!({"email": "a@x.test", "error": "seat limit"}), &requested)
            .unwrap();
        assert_eq!(r.reason, "seat limit");

        assert!(parse_rejection(&json!("other@x.test"), &requested).is_none());
        assert!(parse_rejection(&json!(42), &requested).is_none());
    }

    #[tokio::test]
    async fn test_invite_all_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/acct-1/invites"))
            .and(header("Authorization", "Bearer team-token"))
            .and(body_json(json!({
                "email_addresses": ["a@x.test", "b@x.test"],
                "role": "standard-user",
                "resend_emails": true
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"account_invites": [{}, {}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = inviter(&server.uri()).invite(&team(), &emails()).await.unwrap();
        assert_eq!(outcome, InviteOutcome::all(&emails()));
    }

    #[tokio::test]
    async fn test_invite_partial_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/acct-1/invites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "account_invites": [{}],
                "errored_emails": [{"email": "b@x.test", "error": "already in workspace"}]
            })))
            .mount(&server)
            .await;

        let outcome = inviter(&server.uri()).invite(&team(), &emails()).await.unwrap();
        assert_eq!(outcome.invited, vec!["a@x.test".to_string()]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].reason, "already in workspace");
    }

    #[tokio::test]
    async fn test_invite_unauthorized_fails_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = inviter(&server.uri()).invite(&team(), &emails()).await.unwrap_err();
        assert!(matches!(err, InviteError::Unauthorized(401)));
    }

    #[tokio::test]
    async fn test_invite_server_error_fails_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = inviter(&server.uri()).invite(&team(), &emails()).await.unwrap_err();
        match err {
            InviteError::Api { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = inviter(&server.uri()).invite(&team(), &[]).await.unwrap();
        assert!(outcome.invited.is_empty());
    }

    #[tokio::test]
    async fn test_available_seats_subtracts_usage_and_pending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .and(query_param("account_id", "acct-1"))
            .and(header("Authorization", "Bearer team-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "seats_entitled": 7,
                "seats_in_use": 3,
                "plan_type": "team"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct-1/invites"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [], "total": 2})))
            .expect(1)
            .mount(&server)
            .await;

        let seats = inviter(&server.uri()).available_seats(&team()).await.unwrap();
        assert_eq!(seats, Some(2));
    }

    #[tokio::test]
    async fn test_available_seats_never_negative() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "seats_entitled": 5,
                "seats_in_use": 5
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct-1/invites"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total": 1})))
            .mount(&server)
            .await;

        let seats = inviter(&server.uri()).available_seats(&team()).await.unwrap();
        assert_eq!(seats, Some(0));
    }

    #[tokio::test]
    async fn test_available_seats_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = inviter(&server.uri()).available_seats(&team()).await.unwrap_err();
        assert!(matches!(err, InviteError::Unauthorized(403)));
    }

    #[tokio::test]
    async fn test_seat_check_disabled_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let inviter = HttpTeamInviter::new(InviteConfig {
            api_base: server.uri(),
            role: "standard-user".to_string(),
            timeout_secs: 5,
            check_seats: false,
        })
        .unwrap();
        assert_eq!(inviter.available_seats(&team()).await.unwrap(), None);
    }
}
