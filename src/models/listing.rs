//! Scraped listings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One listing snapshot as extracted by a scrape, before ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawListing {
    /// Service-scoped external id, when the site exposes a stable one.
    pub external_id: Option<String>,
    pub title: String,
    /// Price in minor units of `currency`.
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub url: String,
    pub phone: Option<String>,
    pub image_urls: Vec<String>,
}

/// One persisted listing. Append-only; only moderation flags mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i32,
    pub service_id: String,
    pub external_id: Option<String>,
    pub title: String,
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub url: String,
    pub phone: Option<String>,
    pub image_urls: Vec<String>,
    /// Stable dedup hash; unique across the listings table.
    pub fingerprint: String,
    pub first_seen_at: DateTime<Utc>,
    pub flagged_spam: bool,
    pub flagged_success: bool,
}
