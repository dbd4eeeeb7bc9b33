//! Worker heartbeat status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduler loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Starting,
    Running,
    Idle,
    Stopped,
}

impl WatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Stopped => "stopped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "idle" => Some(Self::Idle),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Counters reported with each heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatcherStats {
    pub runs_completed: u64,
    pub runs_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u64>,
}

/// Heartbeat row for one worker process.
///
/// Readiness is "the heartbeat is fresh": a stale row means the scheduler
/// loop is no longer alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherStatus {
    /// Unique identifier (e.g. "watcher:main").
    pub id: String,
    pub state: WatcherState,
    pub last_heartbeat: DateTime<Utc>,
    pub stats: serde_json::Value,
    pub started_at: DateTime<Utc>,
    /// Container ID or hostname.
    pub host: Option<String>,
    pub version: Option<String>,
}

impl WatcherStatus {
    pub fn new_watcher() -> Self {
        Self {
            id: "watcher:main".to_string(),
            state: WatcherState::Starting,
            last_heartbeat: Utc::now(),
            stats: serde_json::json!({}),
            started_at: Utc::now(),
            host: get_hostname(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }

    pub fn beat(&mut self, state: WatcherState, stats: &WatcherStats) {
        self.state = state;
        self.stats = serde_json::to_value(stats).unwrap_or_default();
        self.last_heartbeat = Utc::now();
    }

    /// Check if the heartbeat is stale (no beat for the given duration).
    pub fn is_stale(&self, threshold_secs: i64) -> bool {
        let age = Utc::now() - self.last_heartbeat;
        age.num_seconds() > threshold_secs
    }
}

fn get_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            WatcherState::Starting,
            WatcherState::Running,
            WatcherState::Idle,
            WatcherState::Stopped,
        ] {
            assert_eq!(WatcherState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(WatcherState::from_str("unknown"), None);
    }

    #[test]
    fn test_beat_updates_heartbeat() {
        let mut status = WatcherStatus::new_watcher();
        assert_eq!(status.state, WatcherState::Starting);

        status.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
        assert!(status.is_stale(60));

        status.beat(
            WatcherState::Running,
            &WatcherStats {
                runs_completed: 3,
                runs_failed: 1,
                queue_size: Some(5),
            },
        );
        assert_eq!(status.state, WatcherState::Running);
        assert!(!status.is_stale(60));

        let stats: WatcherStats = serde_json::from_value(status.stats.clone()).unwrap();
        assert_eq!(stats.runs_completed, 3);
    }
}
