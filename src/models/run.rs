//! Per-run audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How one scrape run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    TransientError,
    CredentialError,
    Blocked,
    ParseError,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::TransientError => "transient_error",
            Self::CredentialError => "credential_error",
            Self::Blocked => "blocked",
            Self::ParseError => "parse_error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "transient_error" => Some(Self::TransientError),
            "credential_error" => Some(Self::CredentialError),
            "blocked" => Some(Self::Blocked),
            "parse_error" => Some(Self::ParseError),
            _ => None,
        }
    }
}

/// Counters produced by one successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Listings extracted by the scrape.
    pub listings_seen: usize,
    /// Listings new to the system.
    pub listings_new: usize,
    /// Notifications created for the triggering user.
    pub notifications_created: usize,
}

/// Audit row for one scrape run of one config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: i32,
    pub search_config_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub error: Option<String>,
    pub listings_seen: i32,
    pub listings_new: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_roundtrip() {
        for outcome in [
            RunOutcome::Success,
            RunOutcome::TransientError,
            RunOutcome::CredentialError,
            RunOutcome::Blocked,
            RunOutcome::ParseError,
        ] {
            assert_eq!(RunOutcome::from_str(outcome.as_str()), Some(outcome));
        }
        assert_eq!(RunOutcome::from_str("other"), None);
    }
}
