//! Device registration repository.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{DeviceRecord, NewDevice};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::{Device, Platform};
use crate::schema::devices;

impl From<DeviceRecord> for Device {
    fn from(record: DeviceRecord) -> Self {
        Device {
            id: record.id,
            user_id: record.user_id,
            push_token: record.push_token,
            platform: Platform::from_str(&record.platform).unwrap_or(Platform::Android),
            is_active: record.is_active != 0,
            created_at: parse_datetime(&record.created_at),
            deactivated_at: parse_datetime_opt(record.deactivated_at),
        }
    }
}

#[derive(Clone)]
pub struct DeviceRepository {
    pool: AsyncSqlitePool,
}

impl DeviceRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Register a push token, reactivating it if it was seen before.
    pub async fn register(
        &self,
        user_id: &str,
        push_token: &str,
        platform: Platform,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::insert_into(devices::table)
            .values(NewDevice {
                user_id,
                push_token,
                platform: platform.as_str(),
                is_active: 1,
                created_at: &now,
                deactivated_at: None,
            })
            .on_conflict(devices::push_token)
            .do_update()
            .set((
                devices::user_id.eq(user_id),
                devices::platform.eq(platform.as_str()),
                devices::is_active.eq(1),
                devices::deactivated_at.eq(None::<String>),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Active devices for a user.
    pub async fn active_for_user(&self, user_id: &str) -> Result<Vec<Device>, DieselError> {
        let mut conn = self.pool.get().await?;

        devices::table
            .filter(devices::user_id.eq(user_id))
            .filter(devices::is_active.eq(1))
            .load::<DeviceRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Device::from).collect())
    }

    /// Deactivate a device (permanently rejected token or unregister).
    pub async fn deactivate(&self, id: i32) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::update(devices::table.find(id))
            .set((
                devices::is_active.eq(0),
                devices::deactivated_at.eq(Some(&now)),
            ))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    /// Get a device by ID.
    pub async fn get(&self, id: i32) -> Result<Option<Device>, DieselError> {
        let mut conn = self.pool.get().await?;

        devices::table
            .find(id)
            .first::<DeviceRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Device::from))
    }
}
