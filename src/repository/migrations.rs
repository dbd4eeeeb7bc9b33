//! Embedded schema bootstrap.
//!
//! The schema is applied idempotently at startup. The unique indexes on
//! `listings.fingerprint` and `notifications(user_id, listing_id)` are
//! load-bearing: they are what makes ingestion and dispatch idempotent
//! across restarts and concurrent runs.

use diesel_async::SimpleAsyncConnection;

use super::pool::{AsyncSqlitePool, DieselError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS services (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    base_url TEXT NOT NULL,
    login_flow TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS service_credentials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    service_id TEXT NOT NULL,
    secret TEXT NOT NULL,
    invalidated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(user_id, service_id)
);

CREATE TABLE IF NOT EXISTS search_configs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    service_id TEXT NOT NULL,
    keywords TEXT NOT NULL DEFAULT '[]',
    price_min BIGINT,
    price_max BIGINT,
    location TEXT,
    custom_filters TEXT NOT NULL DEFAULT '{}',
    interval_seconds INTEGER NOT NULL,
    random_range_seconds INTEGER NOT NULL DEFAULT 0,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    next_run_at TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    disabled_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_search_configs_due
    ON search_configs(enabled, next_run_at);

CREATE TABLE IF NOT EXISTS listings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id TEXT NOT NULL,
    external_id TEXT,
    title TEXT NOT NULL,
    price BIGINT,
    currency TEXT,
    url TEXT NOT NULL,
    phone TEXT,
    image_urls TEXT NOT NULL DEFAULT '[]',
    fingerprint TEXT NOT NULL UNIQUE,
    first_seen_at TEXT NOT NULL,
    flagged_spam INTEGER NOT NULL DEFAULT 0,
    flagged_success INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_listings_external
    ON listings(service_id, external_id);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    listing_id INTEGER NOT NULL,
    search_config_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    read_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(user_id, listing_id)
);

CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    push_token TEXT NOT NULL UNIQUE,
    platform TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    deactivated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_devices_user
    ON devices(user_id, is_active);

CREATE TABLE IF NOT EXISTS scrape_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    search_config_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    outcome TEXT NOT NULL,
    error TEXT,
    listings_seen INTEGER NOT NULL DEFAULT 0,
    listings_new INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_scrape_runs_config
    ON scrape_runs(search_config_id, started_at);

CREATE TABLE IF NOT EXISTS watcher_status (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    last_heartbeat TEXT NOT NULL,
    stats TEXT NOT NULL DEFAULT '{}',
    started_at TEXT NOT NULL,
    host TEXT,
    version TEXT
);
"#;

/// Apply the schema to the database, creating anything missing.
pub async fn ensure_schema(pool: &AsyncSqlitePool) -> Result<(), DieselError> {
    let mut conn = pool.get().await?;
    conn.batch_execute(SCHEMA).await?;
    Ok(())
}
