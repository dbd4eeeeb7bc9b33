//! External marketplace service definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One external marketplace. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Short slug identifier (e.g. "kleinanzeigen").
    pub id: String,
    /// Display name.
    pub name: String,
    /// Base domain, scheme included (e.g. "https://www.example.com").
    pub base_url: String,
    /// Login-flow identifier selecting the scraping strategy.
    pub login_flow: String,
    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn new(id: String, name: String, base_url: String, login_flow: String) -> Self {
        Self {
            id,
            name,
            base_url,
            login_flow,
            created_at: Utc::now(),
        }
    }
}
