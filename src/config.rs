//! Configuration management for listwatch.
//!
//! Settings are read from a TOML file with environment variable overrides
//! for the database path and the credential encryption key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::automation::strategy::StrategyConfig;

/// Environment variable overriding the database path.
pub const ENV_DATABASE: &str = "LISTWATCH_DATABASE";
/// Environment variable holding the base64 credential encryption key.
pub const ENV_CREDENTIAL_KEY: &str = "LISTWATCH_CREDENTIAL_KEY";

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the SQLite database file.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Base64-encoded 32-byte key for credential encryption.
    /// Overridden by `LISTWATCH_CREDENTIAL_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_key: Option<String>,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub automation: AutomationSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub push: PushSettings,
    /// Per-service scraping strategies, keyed by login-flow identifier.
    #[serde(default)]
    pub strategies: HashMap<String, StrategyConfig>,
}

/// Scheduler loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Maximum scrape executions in flight across all services.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Maximum due configs dequeued per scheduler tick.
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,
    /// Consecutive (weighted) failures before a config is auto-disabled.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cap on the exponent used for exponential backoff.
    #[serde(default = "default_backoff_exponent_cap")]
    pub backoff_exponent_cap: u32,
    /// Upper bound on any backoff delay, in seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// How long `stop()` waits for in-flight runs before aborting them.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Minimum spacing between heartbeat writes.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_runs: default_max_concurrent_runs(),
            drain_batch_size: default_drain_batch_size(),
            failure_threshold: default_failure_threshold(),
            backoff_exponent_cap: default_backoff_exponent_cap(),
            max_backoff_secs: default_max_backoff_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

fn default_max_concurrent_runs() -> usize {
    8
}
fn default_drain_batch_size() -> usize {
    16
}
fn default_failure_threshold() -> u32 {
    10
}
fn default_backoff_exponent_cap() -> u32 {
    6
}
fn default_max_backoff_secs() -> u64 {
    6 * 3600
}
fn default_drain_timeout_secs() -> u64 {
    30
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}

/// Browser/session tuning for the automation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationSettings {
    /// Run the browser headless (default: true).
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Page load timeout in seconds.
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    /// Maximum result pages walked per run.
    #[serde(default = "default_max_pages_per_run")]
    pub max_pages_per_run: u32,
    /// Maximum listing snapshots extracted per run.
    #[serde(default = "default_max_items_per_run")]
    pub max_items_per_run: usize,
    /// Evict a session idle longer than this, in seconds.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// Evict a session older than this, in seconds.
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
    /// Evict a session after this many scrapes.
    #[serde(default = "default_session_max_uses")]
    pub session_max_uses: u32,
    /// Remote Chrome DevTools URL (e.g. "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Proxy server URL (e.g. "socks5://127.0.0.1:1080").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Extra Chrome arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chrome_args: Vec<String>,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            page_timeout_secs: default_page_timeout_secs(),
            max_pages_per_run: default_max_pages_per_run(),
            max_items_per_run: default_max_items_per_run(),
            session_idle_secs: default_session_idle_secs(),
            session_max_age_secs: default_session_max_age_secs(),
            session_max_uses: default_session_max_uses(),
            remote_url: None,
            proxy: None,
            chrome_args: Vec::new(),
        }
    }
}

fn default_headless() -> bool {
    true
}
fn default_page_timeout_secs() -> u64 {
    30
}
fn default_max_pages_per_run() -> u32 {
    3
}
fn default_max_items_per_run() -> usize {
    60
}
fn default_session_idle_secs() -> u64 {
    600
}
fn default_session_max_age_secs() -> u64 {
    3600
}
fn default_session_max_uses() -> u32 {
    40
}

/// Per-service concurrency and pacing limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Concurrent automation sessions per service.
    #[serde(default = "default_service_concurrency")]
    pub default_concurrency: usize,
    /// Automation actions per minute per service.
    #[serde(default = "default_actions_per_minute")]
    pub actions_per_minute: u32,
    /// Multiplier applied to the penalty delay on anti-bot blocks.
    #[serde(default = "default_penalty_multiplier")]
    pub penalty_multiplier: f64,
    /// Upper bound on the penalty delay, in seconds.
    #[serde(default = "default_max_penalty_secs")]
    pub max_penalty_secs: u64,
    /// Per-service overrides keyed by service id.
    #[serde(default)]
    pub services: HashMap<String, ServiceLimitOverride>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            default_concurrency: default_service_concurrency(),
            actions_per_minute: default_actions_per_minute(),
            penalty_multiplier: default_penalty_multiplier(),
            max_penalty_secs: default_max_penalty_secs(),
            services: HashMap::new(),
        }
    }
}

/// Override of the default limits for one service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceLimitOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions_per_minute: Option<u32>,
}

fn default_service_concurrency() -> usize {
    2
}
fn default_actions_per_minute() -> u32 {
    12
}
fn default_penalty_multiplier() -> f64 {
    2.0
}
fn default_max_penalty_secs() -> u64 {
    900
}

/// Push provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSettings {
    /// Push gateway endpoint.
    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,
    /// Bearer token for the push gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Delivery attempts per device before giving up.
    #[serde(default = "default_push_max_attempts")]
    pub max_attempts: u32,
    /// Delay between delivery attempts, in milliseconds.
    #[serde(default = "default_push_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        Self {
            endpoint: default_push_endpoint(),
            access_token: None,
            max_attempts: default_push_max_attempts(),
            retry_delay_ms: default_push_retry_delay_ms(),
        }
    }
}

fn default_push_endpoint() -> String {
    "https://exp.host/--/api/v2/push/send".to_string()
}
fn default_push_max_attempts() -> u32 {
    3
}
fn default_push_retry_delay_ms() -> u64 {
    500
}

impl Settings {
    /// Load settings from the given file, or defaults if the file is absent.
    ///
    /// Environment overrides are applied after the file is read.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw)?
            }
            Some(p) => {
                anyhow::bail!("config file not found: {}", p.display());
            }
            None => {
                let default = Self::default_config_path();
                if default.exists() {
                    let raw = std::fs::read_to_string(&default)?;
                    toml::from_str(&raw)?
                } else {
                    Settings::default()
                }
            }
        };

        if let Ok(db) = std::env::var(ENV_DATABASE) {
            settings.database_path = Some(PathBuf::from(db));
        }
        if let Ok(key) = std::env::var(ENV_CREDENTIAL_KEY) {
            settings.credential_key = Some(key);
        }

        Ok(settings)
    }

    /// Default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("listwatch")
            .join("listwatch.toml")
    }

    /// Effective database path.
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("listwatch")
                .join("listwatch.db")
        })
    }
}
