//! Loading the team list.
//!
//! The file holds the session payloads exported for each team owner, either
//! as a JSON list or a single object:
//!
//! ```json
//! [{"user": {"email": "owner@corp.test"},
//!   "account": {"id": "acct-1", "organizationId": "org-1"},
//!   "accessToken": "..."}]
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use super::{Team, TeamError};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTeams {
    Many(Vec<RawTeam>),
    One(RawTeam),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTeam {
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default)]
    account: Option<RawAccount>,
    #[serde(default)]
    access_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUser {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    organization_id: Option<String>,
}

/// Ordered, read-only list of teams.
#[derive(Debug, Clone, Default)]
pub struct TeamRegistry {
    teams: Vec<Team>,
}

impl TeamRegistry {
    /// Load teams from a JSON file.
    pub fn load(path: &Path) -> Result<Self, TeamError> {
        let content = std::fs::read_to_string(path).map_err(|e| TeamError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let registry = Self::from_json(&content)?;
        info!("Loaded {} team(s) from {}", registry.len(), path.display());
        Ok(registry)
    }

    /// Parse teams from JSON text.
    pub fn from_json(content: &str) -> Result<Self, TeamError> {
        let raw: RawTeams =
            serde_json::from_str(content).map_err(|e| TeamError::Parse(e.to_string()))?;
        let raw = match raw {
            RawTeams::Many(list) => list,
            RawTeams::One(single) => vec![single],
        };

        let teams = raw
            .into_iter()
            .enumerate()
            .map(|(index, entry)| convert(index, entry))
            .collect::<Result<Vec<_>, _>>()?;

        Self::from_teams(teams)
    }

    /// Build a registry from already constructed teams.
    pub fn from_teams(teams: Vec<Team>) -> Result<Self, TeamError> {
        let mut seen = HashSet::new();
        for team in &teams {
            if !seen.insert(team.id.as_str()) {
                return Err(TeamError::DuplicateId(team.id.clone()));
            }
        }
        Ok(Self { teams })
    }

    pub fn get(&self, id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == id)
    }

    /// Teams in configured order.
    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}

fn convert(index: usize, raw: RawTeam) -> Result<Team, TeamError> {
    let bearer_credential = raw
        .access_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| TeamError::Invalid {
            index,
            reason: "missing accessToken".to_string(),
        })?;

    let account = raw.account.unwrap_or_default();
    let account_reference = account
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| TeamError::Invalid {
            index,
            reason: "missing account.id".to_string(),
        })?;

    let email = raw
        .user
        .and_then(|u| u.email)
        .filter(|e| !e.trim().is_empty());

    let id = email
        .as_deref()
        .and_then(|e| e.split('@').next())
        .filter(|local| !local.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("team-{}", index + 1));

    let display_name = email.unwrap_or_else(|| id.clone());

    Ok(Team {
        id,
        display_name,
        bearer_credential,
        account_reference,
        organization_id: account.organization_id,
    })
}
