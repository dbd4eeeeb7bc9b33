//! Search config repository.
//!
//! The scheduling columns (`last_run_at`, `next_run_at`,
//! `consecutive_failures`, `disabled_reason`) are written only through
//! the dedicated methods the scheduler calls.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::SearchConfigRecord;
use super::{parse_datetime, parse_datetime_opt};
use crate::models::SearchConfig;
use crate::schema::search_configs;

impl From<SearchConfigRecord> for SearchConfig {
    fn from(record: SearchConfigRecord) -> Self {
        SearchConfig {
            id: record.id,
            user_id: record.user_id,
            service_id: record.service_id,
            keywords: serde_json::from_str(&record.keywords).unwrap_or_default(),
            price_min: record.price_min,
            price_max: record.price_max,
            location: record.location,
            custom_filters: serde_json::from_str(&record.custom_filters).unwrap_or_default(),
            interval_seconds: record.interval_seconds.max(0) as u32,
            random_range_seconds: record.random_range_seconds.max(0) as u32,
            enabled: record.enabled != 0,
            last_run_at: parse_datetime_opt(record.last_run_at),
            next_run_at: parse_datetime_opt(record.next_run_at),
            consecutive_failures: record.consecutive_failures.max(0) as u32,
            disabled_reason: record.disabled_reason,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct SearchConfigRepository {
    pool: AsyncSqlitePool,
}

impl SearchConfigRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Get a config by ID.
    pub async fn get(&self, id: &str) -> Result<Option<SearchConfig>, DieselError> {
        let mut conn = self.pool.get().await?;

        search_configs::table
            .find(id)
            .first::<SearchConfigRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(SearchConfig::from))
    }

    /// All enabled configs, the scheduler's startup seed.
    pub async fn load_enabled(&self) -> Result<Vec<SearchConfig>, DieselError> {
        let mut conn = self.pool.get().await?;

        search_configs::table
            .filter(search_configs::enabled.eq(1))
            .order(search_configs::next_run_at.asc())
            .load::<SearchConfigRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(SearchConfig::from).collect())
    }

    /// Save a config (insert or full-row update).
    pub async fn save(&self, config: &SearchConfig) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let keywords =
            serde_json::to_string(&config.keywords).unwrap_or_else(|_| "[]".to_string());
        let custom_filters =
            serde_json::to_string(&config.custom_filters).unwrap_or_else(|_| "{}".to_string());

        diesel::replace_into(search_configs::table)
            .values((
                search_configs::id.eq(&config.id),
                search_configs::user_id.eq(&config.user_id),
                search_configs::service_id.eq(&config.service_id),
                search_configs::keywords.eq(&keywords),
                search_configs::price_min.eq(config.price_min),
                search_configs::price_max.eq(config.price_max),
                search_configs::location.eq(&config.location),
                search_configs::custom_filters.eq(&custom_filters),
                search_configs::interval_seconds.eq(config.interval_seconds as i32),
                search_configs::random_range_seconds.eq(config.random_range_seconds as i32),
                search_configs::enabled.eq(config.enabled as i32),
                search_configs::last_run_at.eq(config.last_run_at.map(|t| t.to_rfc3339())),
                search_configs::next_run_at.eq(config.next_run_at.map(|t| t.to_rfc3339())),
                search_configs::consecutive_failures.eq(config.consecutive_failures as i32),
                search_configs::disabled_reason.eq(&config.disabled_reason),
                search_configs::created_at.eq(config.created_at.to_rfc3339()),
                search_configs::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Record a completed run: cadence fields only, single writer.
    pub async fn record_run(
        &self,
        id: &str,
        last_run_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        consecutive_failures: u32,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(search_configs::table.find(id))
            .set((
                search_configs::last_run_at.eq(Some(last_run_at.to_rfc3339())),
                search_configs::next_run_at.eq(Some(next_run_at.to_rfc3339())),
                search_configs::consecutive_failures.eq(consecutive_failures as i32),
                search_configs::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Move a config's next run without touching the failure counter.
    pub async fn set_next_run(
        &self,
        id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(search_configs::table.find(id))
            .set((
                search_configs::next_run_at.eq(Some(next_run_at.to_rfc3339())),
                search_configs::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Auto-disable a config, flagging it for user attention.
    pub async fn disable(&self, id: &str, reason: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(search_configs::table.find(id))
            .set((
                search_configs::enabled.eq(0),
                search_configs::disabled_reason.eq(Some(reason)),
                search_configs::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
