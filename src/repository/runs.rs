//! Scrape run audit repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::parse_datetime;
use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{NewScrapeRun, ScrapeRunRecord};
use crate::models::{RunOutcome, ScrapeRun};
use crate::schema::scrape_runs;

impl From<ScrapeRunRecord> for ScrapeRun {
    fn from(record: ScrapeRunRecord) -> Self {
        ScrapeRun {
            id: record.id,
            search_config_id: record.search_config_id,
            started_at: parse_datetime(&record.started_at),
            finished_at: parse_datetime(&record.finished_at),
            outcome: RunOutcome::from_str(&record.outcome).unwrap_or(RunOutcome::TransientError),
            error: record.error,
            listings_seen: record.listings_seen,
            listings_new: record.listings_new,
        }
    }
}

#[derive(Clone)]
pub struct RunRepository {
    pool: AsyncSqlitePool,
}

impl RunRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Append one run record.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        search_config_id: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        finished_at: chrono::DateTime<chrono::Utc>,
        outcome: RunOutcome,
        error: Option<&str>,
        listings_seen: i32,
        listings_new: i32,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let started = started_at.to_rfc3339();
        let finished = finished_at.to_rfc3339();

        diesel::insert_into(scrape_runs::table)
            .values(NewScrapeRun {
                search_config_id,
                started_at: &started,
                finished_at: &finished,
                outcome: outcome.as_str(),
                error,
                listings_seen,
                listings_new,
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Most recent runs for a config, newest first.
    pub async fn recent_for_config(
        &self,
        search_config_id: &str,
        limit: u32,
    ) -> Result<Vec<ScrapeRun>, DieselError> {
        let mut conn = self.pool.get().await?;

        scrape_runs::table
            .filter(scrape_runs::search_config_id.eq(search_config_id))
            .order(scrape_runs::started_at.desc())
            .limit(limit as i64)
            .load::<ScrapeRunRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(ScrapeRun::from).collect())
    }
}
