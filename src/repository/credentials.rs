//! Service credential repository.
//!
//! Rows hold the encrypted envelope only; decryption happens in the
//! credential vault, never here.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{CredentialRecord, NewCredential};
use super::{parse_datetime, parse_datetime_opt};
use crate::models::ServiceCredential;
use crate::schema::service_credentials;

impl From<CredentialRecord> for ServiceCredential {
    fn from(record: CredentialRecord) -> Self {
        ServiceCredential {
            id: record.id,
            user_id: record.user_id,
            service_id: record.service_id,
            secret: record.secret,
            invalidated_at: parse_datetime_opt(record.invalidated_at),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

#[derive(Clone)]
pub struct CredentialRepository {
    pool: AsyncSqlitePool,
}

impl CredentialRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Get the credential for a (user, service) pair.
    pub async fn get(
        &self,
        user_id: &str,
        service_id: &str,
    ) -> Result<Option<ServiceCredential>, DieselError> {
        let mut conn = self.pool.get().await?;

        service_credentials::table
            .filter(service_credentials::user_id.eq(user_id))
            .filter(service_credentials::service_id.eq(service_id))
            .first::<CredentialRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(ServiceCredential::from))
    }

    /// Insert or update the credential for a (user, service) pair.
    ///
    /// A fresh secret clears any previous invalidation.
    pub async fn upsert(
        &self,
        user_id: &str,
        service_id: &str,
        secret: &str,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::insert_into(service_credentials::table)
            .values(NewCredential {
                user_id,
                service_id,
                secret,
                invalidated_at: None,
                created_at: &now,
                updated_at: &now,
            })
            .on_conflict((
                service_credentials::user_id,
                service_credentials::service_id,
            ))
            .do_update()
            .set((
                service_credentials::secret.eq(secret),
                service_credentials::invalidated_at.eq(None::<String>),
                service_credentials::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    /// Soft-invalidate a credential after repeated login failures.
    pub async fn invalidate(&self, id: i32) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().to_rfc3339();

        diesel::update(service_credentials::table.find(id))
            .set((
                service_credentials::invalidated_at.eq(Some(&now)),
                service_credentials::updated_at.eq(&now),
            ))
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
