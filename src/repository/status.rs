//! Watcher heartbeat repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::parse_datetime;
use super::pool::{AsyncSqlitePool, DieselError};
use super::records::WatcherStatusRecord;
use crate::models::{WatcherState, WatcherStatus};
use crate::schema::watcher_status;

impl From<WatcherStatusRecord> for WatcherStatus {
    fn from(record: WatcherStatusRecord) -> Self {
        WatcherStatus {
            id: record.id,
            state: WatcherState::from_str(&record.state).unwrap_or(WatcherState::Stopped),
            last_heartbeat: parse_datetime(&record.last_heartbeat),
            stats: serde_json::from_str(&record.stats).unwrap_or_default(),
            started_at: parse_datetime(&record.started_at),
            host: record.host,
            version: record.version,
        }
    }
}

#[derive(Clone)]
pub struct StatusRepository {
    pool: AsyncSqlitePool,
}

impl StatusRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Write the heartbeat row.
    pub async fn upsert(&self, status: &WatcherStatus) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        let stats = serde_json::to_string(&status.stats).unwrap_or_else(|_| "{}".to_string());

        diesel::replace_into(watcher_status::table)
            .values((
                watcher_status::id.eq(&status.id),
                watcher_status::state.eq(status.state.as_str()),
                watcher_status::last_heartbeat.eq(status.last_heartbeat.to_rfc3339()),
                watcher_status::stats.eq(&stats),
                watcher_status::started_at.eq(status.started_at.to_rfc3339()),
                watcher_status::host.eq(&status.host),
                watcher_status::version.eq(&status.version),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Read a heartbeat row.
    pub async fn get(&self, id: &str) -> Result<Option<WatcherStatus>, DieselError> {
        let mut conn = self.pool.get().await?;

        watcher_status::table
            .find(id)
            .first::<WatcherStatusRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(WatcherStatus::from))
    }
}
