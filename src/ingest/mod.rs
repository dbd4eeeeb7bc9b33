//! Ingestion and dedup.
//!
//! Turns one run's raw extraction results into the durable set of
//! listings, deciding which are new to the system. Dedup is keyed on a
//! content fingerprint backed by a unique index, so re-ingesting an
//! identical snapshot is a no-op even across process restarts and
//! concurrent runs.

use sha2::{Digest, Sha256};

use crate::models::{Listing, RawListing};
use crate::repository::{DieselError, ListingRepository};

/// One listing after ingestion, with its global novelty.
#[derive(Debug, Clone)]
pub struct IngestedListing {
    pub listing: Listing,
    /// True when this run inserted the listing.
    pub is_new: bool,
}

/// Result of ingesting one run.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub listings: Vec<IngestedListing>,
}

impl IngestOutcome {
    pub fn new_count(&self) -> usize {
        self.listings.iter().filter(|l| l.is_new).count()
    }
}

#[derive(Clone)]
pub struct Ingestor {
    listings: ListingRepository,
}

impl Ingestor {
    pub fn new(listings: ListingRepository) -> Self {
        Self { listings }
    }

    /// Persist every raw record that is not already known.
    ///
    /// Existing listings are returned too (not "new" globally) because the
    /// same listing can still be newly matched for the triggering user;
    /// that decision belongs to notification dispatch.
    pub async fn ingest(
        &self,
        service_id: &str,
        records: &[RawListing],
    ) -> Result<IngestOutcome, DieselError> {
        let mut outcome = IngestOutcome::default();

        for raw in records {
            let fingerprint = fingerprint(service_id, raw);
            let (listing, is_new) = self
                .listings
                .insert_if_new(service_id, raw, &fingerprint)
                .await?;
            outcome.listings.push(IngestedListing { listing, is_new });
        }

        Ok(outcome)
    }
}

/// Stable dedup hash for a raw listing.
///
/// Prefers the service-scoped external id; falls back to normalized
/// content fields when the site exposes no stable id.
pub fn fingerprint(service_id: &str, raw: &RawListing) -> String {
    let mut hasher = Sha256::new();

    match raw.external_id.as_deref().filter(|id| !id.is_empty()) {
        Some(external_id) => {
            hasher.update(b"id\x00");
            hasher.update(service_id.as_bytes());
            hasher.update(b"\x00");
            hasher.update(external_id.as_bytes());
        }
        None => {
            hasher.update(b"content\x00");
            hasher.update(service_id.as_bytes());
            hasher.update(b"\x00");
            hasher.update(normalize_title(&raw.title).as_bytes());
            hasher.update(b"\x00");
            hasher.update(raw.price.unwrap_or(-1).to_le_bytes());
            hasher.update(b"\x00");
            hasher.update(normalize_url(&raw.url).as_bytes());
        }
    }

    hex::encode(hasher.finalize())
}

/// Lowercase and collapse whitespace so cosmetic edits don't defeat dedup.
fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip query and fragment; tracking parameters churn between scrapes.
fn normalize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .to_string(),
    }
}
