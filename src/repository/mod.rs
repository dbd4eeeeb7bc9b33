//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM with compile-time query checking
//! against SQLite. One repository struct per aggregate; scheduling fields
//! on search configs are written only by the scheduler.

pub mod credentials;
pub mod devices;
pub mod listings;
pub mod migrations;
pub mod notifications;
pub mod pool;
pub mod records;
pub mod runs;
pub mod search_configs;
pub mod services;
pub mod status;

pub use credentials::CredentialRepository;
pub use devices::DeviceRepository;
pub use listings::ListingRepository;
pub use migrations::ensure_schema;
pub use notifications::NotificationRepository;
pub use pool::{AsyncSqlitePool, DieselError};
pub use runs::RunRepository;
pub use search_configs::SearchConfigRepository;
pub use services::ServiceRepository;
pub use status::StatusRepository;

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Fresh on-disk database with the schema applied.
    pub async fn setup_test_db() -> (AsyncSqlitePool, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = AsyncSqlitePool::from_path(&dir.path().join("test.db"));
        ensure_schema(&pool).await.unwrap();
        (pool, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_roundtrip() {
        let now = Utc::now();
        let parsed = parse_datetime(&now.to_rfc3339());
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn test_parse_datetime_invalid_defaults_to_epoch() {
        assert_eq!(parse_datetime("not a date"), DateTime::UNIX_EPOCH);
    }
}
