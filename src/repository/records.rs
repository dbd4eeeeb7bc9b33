//! Diesel ORM models for database tables.
//!
//! These models provide compile-time type checking for database operations.

use diesel::prelude::*;

use crate::schema;

/// Service record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::services)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub login_flow: String,
    pub created_at: String,
}

/// New service for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::services)]
pub struct NewService<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub base_url: &'a str,
    pub login_flow: &'a str,
    pub created_at: &'a str,
}

/// Credential record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::service_credentials)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CredentialRecord {
    pub id: i32,
    pub user_id: String,
    pub service_id: String,
    pub secret: String,
    pub invalidated_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New credential for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::service_credentials)]
pub struct NewCredential<'a> {
    pub user_id: &'a str,
    pub service_id: &'a str,
    pub secret: &'a str,
    pub invalidated_at: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Search config record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::search_configs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SearchConfigRecord {
    pub id: String,
    pub user_id: String,
    pub service_id: String,
    pub keywords: String,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub location: Option<String>,
    pub custom_filters: String,
    pub interval_seconds: i32,
    pub random_range_seconds: i32,
    pub enabled: i32,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub consecutive_failures: i32,
    pub disabled_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Listing record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::listings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ListingRecord {
    pub id: i32,
    pub service_id: String,
    pub external_id: Option<String>,
    pub title: String,
    pub price: Option<i64>,
    pub currency: Option<String>,
    pub url: String,
    pub phone: Option<String>,
    pub image_urls: String,
    pub fingerprint: String,
    pub first_seen_at: String,
    pub flagged_spam: i32,
    pub flagged_success: i32,
}

/// New listing for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::listings)]
pub struct NewListing<'a> {
    pub service_id: &'a str,
    pub external_id: Option<&'a str>,
    pub title: &'a str,
    pub price: Option<i64>,
    pub currency: Option<&'a str>,
    pub url: &'a str,
    pub phone: Option<&'a str>,
    pub image_urls: &'a str,
    pub fingerprint: &'a str,
    pub first_seen_at: &'a str,
    pub flagged_spam: i32,
    pub flagged_success: i32,
}

/// Notification record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::notifications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NotificationRecord {
    pub id: i32,
    pub user_id: String,
    pub listing_id: i32,
    pub search_config_id: String,
    pub status: String,
    pub read_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New notification for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::notifications)]
pub struct NewNotification<'a> {
    pub user_id: &'a str,
    pub listing_id: i32,
    pub search_config_id: &'a str,
    pub status: &'a str,
    pub read_at: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Device record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::devices)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeviceRecord {
    pub id: i32,
    pub user_id: String,
    pub push_token: String,
    pub platform: String,
    pub is_active: i32,
    pub created_at: String,
    pub deactivated_at: Option<String>,
}

/// New device for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::devices)]
pub struct NewDevice<'a> {
    pub user_id: &'a str,
    pub push_token: &'a str,
    pub platform: &'a str,
    pub is_active: i32,
    pub created_at: &'a str,
    pub deactivated_at: Option<&'a str>,
}

/// Scrape run record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::scrape_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScrapeRunRecord {
    pub id: i32,
    pub search_config_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub outcome: String,
    pub error: Option<String>,
    pub listings_seen: i32,
    pub listings_new: i32,
}

/// New scrape run for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::scrape_runs)]
pub struct NewScrapeRun<'a> {
    pub search_config_id: &'a str,
    pub started_at: &'a str,
    pub finished_at: &'a str,
    pub outcome: &'a str,
    pub error: Option<&'a str>,
    pub listings_seen: i32,
    pub listings_new: i32,
}

/// Watcher status record from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::watcher_status)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WatcherStatusRecord {
    pub id: String,
    pub state: String,
    pub last_heartbeat: String,
    pub stats: String,
    pub started_at: String,
    pub host: Option<String>,
    pub version: Option<String>,
}
