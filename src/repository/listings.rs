//! Listing repository.
//!
//! Listings are append-only. The unique index on `fingerprint` is the
//! dedup mechanism: concurrent or repeated ingestion of the same snapshot
//! cannot produce duplicate rows.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::parse_datetime;
use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{ListingRecord, NewListing};
use crate::models::{Listing, RawListing};
use crate::schema::listings;

impl From<ListingRecord> for Listing {
    fn from(record: ListingRecord) -> Self {
        Listing {
            id: record.id,
            service_id: record.service_id,
            external_id: record.external_id,
            title: record.title,
            price: record.price,
            currency: record.currency,
            url: record.url,
            phone: record.phone,
            image_urls: serde_json::from_str(&record.image_urls).unwrap_or_default(),
            fingerprint: record.fingerprint,
            first_seen_at: parse_datetime(&record.first_seen_at),
            flagged_spam: record.flagged_spam != 0,
            flagged_success: record.flagged_success != 0,
        }
    }
}

#[derive(Clone)]
pub struct ListingRepository {
    pool: AsyncSqlitePool,
}

impl ListingRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a scraped snapshot unless its fingerprint already exists.
    ///
    /// Returns the stored listing and whether this call created it. The
    /// insert races safely: the fingerprint index decides, not the caller.
    pub async fn insert_if_new(
        &self,
        service_id: &str,
        raw: &RawListing,
        fingerprint: &str,
    ) -> Result<(Listing, bool), DieselError> {
        let mut conn = self.pool.get().await?;

        let image_urls =
            serde_json::to_string(&raw.image_urls).unwrap_or_else(|_| "[]".to_string());
        let first_seen_at = Utc::now().to_rfc3339();

        let inserted = diesel::insert_into(listings::table)
            .values(NewListing {
                service_id,
                external_id: raw.external_id.as_deref(),
                title: &raw.title,
                price: raw.price,
                currency: raw.currency.as_deref(),
                url: &raw.url,
                phone: raw.phone.as_deref(),
                image_urls: &image_urls,
                fingerprint,
                first_seen_at: &first_seen_at,
                flagged_spam: 0,
                flagged_success: 0,
            })
            .on_conflict(listings::fingerprint)
            .do_nothing()
            .execute(&mut conn)
            .await?;

        let record = listings::table
            .filter(listings::fingerprint.eq(fingerprint))
            .first::<ListingRecord>(&mut conn)
            .await?;

        Ok((Listing::from(record), inserted > 0))
    }

    /// Get a listing by ID.
    pub async fn get(&self, id: i32) -> Result<Option<Listing>, DieselError> {
        let mut conn = self.pool.get().await?;

        listings::table
            .find(id)
            .first::<ListingRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Listing::from))
    }

    /// Total listing count.
    pub async fn count(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        listings::table.select(count_star()).first(&mut conn).await
    }

    /// User moderation: mark a listing as spam.
    pub async fn set_spam_flag(&self, id: i32, flagged: bool) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(listings::table.find(id))
            .set(listings::flagged_spam.eq(flagged as i32))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// User moderation: mark a purchase made through this listing.
    pub async fn set_success_flag(&self, id: i32, flagged: bool) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(listings::table.find(id))
            .set(listings::flagged_success.eq(flagged as i32))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::setup_test_db;

    fn raw(external_id: &str) -> RawListing {
        RawListing {
            external_id: Some(external_id.to_string()),
            title: "Trek 520 touring bike".to_string(),
            price: Some(45_000),
            currency: Some("EUR".to_string()),
            url: "https://example.com/item/123".to_string(),
            phone: None,
            image_urls: vec!["https://example.com/img/1.jpg".to_string()],
        }
    }

    #[tokio::test]
    async fn test_insert_if_new_dedups_on_fingerprint() {
        let (pool, _dir) = setup_test_db().await;
        let repo = ListingRepository::new(pool);

        let (first, created) = repo.insert_if_new("svc", &raw("123"), "fp-1").await.unwrap();
        assert!(created);

        let (second, created_again) =
            repo.insert_if_new("svc", &raw("123"), "fp-1").await.unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_insert_yields_one_row() {
        let (pool, _dir) = setup_test_db().await;
        let repo = ListingRepository::new(pool);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.insert_if_new("svc", &raw("123"), "fp-race").await
            }));
        }

        let mut created_count = 0;
        for handle in handles {
            let (_, created) = handle.await.unwrap().unwrap();
            if created {
                created_count += 1;
            }
        }

        assert_eq!(created_count, 1);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_moderation_flags() {
        let (pool, _dir) = setup_test_db().await;
        let repo = ListingRepository::new(pool);

        let (listing, _) = repo.insert_if_new("svc", &raw("1"), "fp-1").await.unwrap();
        repo.set_spam_flag(listing.id, true).await.unwrap();

        let fetched = repo.get(listing.id).await.unwrap().unwrap();
        assert!(fetched.flagged_spam);
        assert!(!fetched.flagged_success);
    }
}
