//! Notification repository.
//!
//! The unique index on (user_id, listing_id) makes notification creation
//! idempotent: a crash between ingestion and dispatch, or two concurrent
//! runs matching the same listing, cannot notify a user twice.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{NewNotification, NotificationRecord};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Notification, NotificationStatus};
use crate::schema::notifications;

impl From<NotificationRecord> for Notification {
    fn from(record: NotificationRecord) -> Self {
        Notification {
            id: record.id,
            user_id: record.user_id,
            listing_id: record.listing_id,
            search_config_id: record.search_config_id,
            status: NotificationStatus::from_str(&record.status)
                .unwrap_or(NotificationStatus::Pending),
            read_at: parse_datetime_opt(record.read_at),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct NotificationRepository {
    pool: AsyncSqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create a pending notification for (user, listing), unless one
    /// already exists.
    ///
    /// Returns the new notification, or `None` when the pair was already
    /// notified; the caller must then skip delivery silently.
    pub async fn create_pending(
        &self,
        user_id: &str,
        listing_id: i32,
        search_config_id: &str,
    ) -> Result<Option<Notification>, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        let inserted = diesel::insert_into(notifications::table)
            .values(NewNotification {
                user_id,
                listing_id,
                search_config_id,
                status: NotificationStatus::Pending.as_str(),
                read_at: None,
                created_at: &now,
                updated_at: &now,
            })
            .on_conflict((notifications::user_id, notifications::listing_id))
            .do_nothing()
            .execute(&mut conn)
            .await?;

        if inserted == 0 {
            return Ok(None);
        }

        notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::listing_id.eq(listing_id))
            .first::<NotificationRecord>(&mut conn)
            .await
            .map(|record| Some(Notification::from(record)))
    }

    /// Update delivery status.
    pub async fn set_status(
        &self,
        id: i32,
        status: NotificationStatus,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(notifications::table.find(id))
            .set((
                notifications::status.eq(status.as_str()),
                notifications::updated_at.eq(Utc::now().to_rfc3339()),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Find the notification for a (user, listing) pair.
    pub async fn find(
        &self,
        user_id: &str,
        listing_id: i32,
    ) -> Result<Option<Notification>, DieselError> {
        let mut conn = self.pool.get().await?;

        notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::listing_id.eq(listing_id))
            .first::<NotificationRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Notification::from))
    }

    /// All notifications for a user, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Notification>, DieselError> {
        let mut conn = self.pool.get().await?;

        notifications::table
            .filter(notifications::user_id.eq(user_id))
            .order(notifications::created_at.desc())
            .load::<NotificationRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Notification::from).collect())
    }

    /// Mark a notification read (user action, out of the core pipeline).
    pub async fn mark_read(&self, id: i32) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::update(notifications::table.find(id))
            .set((
                notifications::status.eq(NotificationStatus::Read.as_str()),
                notifications::read_at.eq(Some(&now)),
                notifications::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
