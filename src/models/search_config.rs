//! User-defined saved searches and their run cadence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum run interval in seconds.
pub const MIN_INTERVAL_SECONDS: u32 = 30;
/// Maximum run interval in seconds (one day).
pub const MAX_INTERVAL_SECONDS: u32 = 86_400;
/// Maximum jitter range in seconds.
pub const MAX_RANDOM_RANGE_SECONDS: u32 = 300;

/// Validation failure for a search config.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("interval_seconds must be between {MIN_INTERVAL_SECONDS} and {MAX_INTERVAL_SECONDS}, got {0}")]
    IntervalOutOfRange(u32),
    #[error("random_range_seconds must be at most {MAX_RANDOM_RANGE_SECONDS}, got {0}")]
    RandomRangeOutOfRange(u32),
    #[error("price_min ({min}) must not exceed price_max ({max})")]
    PriceRangeInverted { min: i64, max: i64 },
    #[error("price bounds must be positive")]
    NonPositivePrice,
    #[error("keywords must not be empty")]
    EmptyKeywords,
}

/// One saved search against one service, owned by one user.
///
/// The scheduler owns `last_run_at`, `next_run_at` and
/// `consecutive_failures`; everything else is mutated by user action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub id: String,
    pub user_id: String,
    pub service_id: String,
    /// Ordered search keywords.
    pub keywords: Vec<String>,
    pub price_min: Option<i64>,
    pub price_max: Option<i64>,
    pub location: Option<String>,
    /// Free-form service-specific filters, appended to the query.
    pub custom_filters: serde_json::Map<String, serde_json::Value>,
    pub interval_seconds: u32,
    /// Jitter added on top of the interval.
    pub random_range_seconds: u32,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// Set when the scheduler auto-disables the config.
    pub disabled_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchConfig {
    /// Create a new enabled config, due immediately.
    pub fn new(
        user_id: String,
        service_id: String,
        keywords: Vec<String>,
        interval_seconds: u32,
        random_range_seconds: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            service_id,
            keywords,
            price_min: None,
            price_max: None,
            location: None,
            custom_filters: serde_json::Map::new(),
            interval_seconds,
            random_range_seconds,
            enabled: true,
            last_run_at: None,
            next_run_at: Some(now),
            consecutive_failures: 0,
            disabled_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the invariants the API layer must enforce before saving.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(&self.interval_seconds) {
            return Err(ConfigValidationError::IntervalOutOfRange(
                self.interval_seconds,
            ));
        }
        if self.random_range_seconds > MAX_RANDOM_RANGE_SECONDS {
            return Err(ConfigValidationError::RandomRangeOutOfRange(
                self.random_range_seconds,
            ));
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigValidationError::EmptyKeywords);
        }
        if self.price_min.is_some_and(|p| p <= 0) || self.price_max.is_some_and(|p| p <= 0) {
            return Err(ConfigValidationError::NonPositivePrice);
        }
        if let (Some(min), Some(max)) = (self.price_min, self.price_max) {
            if min > max {
                return Err(ConfigValidationError::PriceRangeInverted { min, max });
            }
        }
        Ok(())
    }

    /// Whether the config is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at.is_some_and(|t| t <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SearchConfig {
        SearchConfig::new(
            "user-1".to_string(),
            "svc".to_string(),
            vec!["vintage".to_string(), "bike".to_string()],
            60,
            15,
        )
    }

    #[test]
    fn test_new_config_is_due_immediately() {
        let c = config();
        assert!(c.is_due(Utc::now()));
        assert_eq!(c.consecutive_failures, 0);
        assert!(c.enabled);
    }

    #[test]
    fn test_validate_ok() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn test_validate_interval_bounds() {
        let mut c = config();
        c.interval_seconds = 29;
        assert!(matches!(
            c.validate(),
            Err(ConfigValidationError::IntervalOutOfRange(29))
        ));
        c.interval_seconds = 86_401;
        assert!(c.validate().is_err());
        c.interval_seconds = 86_400;
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn test_validate_jitter_bound() {
        let mut c = config();
        c.random_range_seconds = 301;
        assert!(matches!(
            c.validate(),
            Err(ConfigValidationError::RandomRangeOutOfRange(301))
        ));
    }

    #[test]
    fn test_validate_price_range() {
        let mut c = config();
        c.price_min = Some(500);
        c.price_max = Some(100);
        assert!(matches!(
            c.validate(),
            Err(ConfigValidationError::PriceRangeInverted { .. })
        ));
        c.price_max = Some(500);
        assert_eq!(c.validate(), Ok(()));
        c.price_min = Some(0);
        assert_eq!(
            c.validate(),
            Err(ConfigValidationError::NonPositivePrice)
        );
    }

    #[test]
    fn test_disabled_config_never_due() {
        let mut c = config();
        c.enabled = false;
        assert!(!c.is_due(Utc::now()));
    }
}
