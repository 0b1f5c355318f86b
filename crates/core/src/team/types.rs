//! Team types.

use std::fmt;

use thiserror::Error;

/// A pre-authorized team. Immutable for the duration of a run.
#[derive(Clone, PartialEq, Eq)]
pub struct Team {
    /// Stable identifier used as the tracker key.
    pub id: String,
    pub display_name: String,
    /// Bearer token authorizing invites into the team.
    pub bearer_credential: String,
    /// Account the invites are issued against.
    pub account_reference: String,
    pub organization_id: Option<String>,
}

impl Team {
    /// The account that owns the team, when the team list names one.
    pub fn owner_email(&self) -> Option<&str> {
        self.display_name
            .contains('@')
            .then_some(self.display_name.as_str())
    }

    pub fn is_owner(&self, email: &str) -> bool {
        self.owner_email()
            .is_some_and(|owner| owner.eq_ignore_ascii_case(email))
    }
}

impl fmt::Debug for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Team")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("bearer_credential", &"[REDACTED]")
            .field("account_reference", &self.account_reference)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// Errors loading the team list.
#[derive(Debug, Error)]
pub enum TeamError {
    #[error("failed to read team file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse team file: {0}")]
    Parse(String),

    #[error("team entry {index}: {reason}")]
    Invalid { index: usize, reason: String },

    #[error("duplicate team id: {0}")]
    DuplicateId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_credential() {
        let team = Team {
            id: "alpha".to_string(),
            display_name: "alpha@corp.test".to_string(),
            bearer_credential: "secret-token".to_string(),
            account_reference: "acct-1".to_string(),
            organization_id: None,
        };
        let debug = format!("{:?}", team);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_owner_email_requires_address() {
        let mut team = Team {
            id: "alpha".to_string(),
            display_name: "Alpha@corp.test".to_string(),
            bearer_credential: "t".to_string(),
            account_reference: "acct-1".to_string(),
            organization_id: None,
        };
        assert_eq!(team.owner_email(), Some("Alpha@corp.test"));
        assert!(team.is_owner("alpha@corp.test"));
        assert!(!team.is_owner("member@corp.test"));

        team.display_name = "team-2".to_string();
        assert!(team.owner_email().is_none());
        assert!(!team.is_owner("team-2"));
    }
}
