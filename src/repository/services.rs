//! Service repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::parse_datetime;
use super::pool::{AsyncSqlitePool, DieselError};
use super::records::{NewService, ServiceRecord};
use crate::models::Service;
use crate::schema::services;

impl From<ServiceRecord> for Service {
    fn from(record: ServiceRecord) -> Self {
        Service {
            id: record.id,
            name: record.name,
            base_url: record.base_url,
            login_flow: record.login_flow,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

#[derive(Clone)]
pub struct ServiceRepository {
    pool: AsyncSqlitePool,
}

impl ServiceRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Get a service by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Service>, DieselError> {
        let mut conn = self.pool.get().await?;

        services::table
            .find(id)
            .first::<ServiceRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(Service::from))
    }

    /// Get all services.
    pub async fn get_all(&self) -> Result<Vec<Service>, DieselError> {
        let mut conn = self.pool.get().await?;

        services::table
            .load::<ServiceRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(Service::from).collect())
    }

    /// Save a service (insert or update using ON CONFLICT).
    pub async fn save(&self, service: &Service) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        let created_at = service.created_at.to_rfc3339();

        diesel::replace_into(services::table)
            .values(NewService {
                id: &service.id,
                name: &service.name,
                base_url: &service.base_url,
                login_flow: &service.login_flow,
                created_at: &created_at,
            })
            .execute(&mut conn)
            .await?;

        Ok(())
    }
}
