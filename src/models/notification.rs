//! Notification records and their delivery state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery state of a notification.
///
/// `Pending → Sent → Delivered → Read`, or `Failed` when no device could
/// be reached. `Read` is set only by explicit user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// At most one notification ever exists per (user, listing) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i32,
    pub user_id: String,
    pub listing_id: i32,
    /// The config whose run first matched the listing for this user.
    pub search_config_id: String,
    pub status: NotificationStatus,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Sent,
            NotificationStatus::Delivered,
            NotificationStatus::Read,
            NotificationStatus::Failed,
        ] {
            assert_eq!(NotificationStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_status_from_invalid() {
        assert_eq!(NotificationStatus::from_str("bogus"), None);
        assert_eq!(NotificationStatus::from_str(""), None);
    }
}
