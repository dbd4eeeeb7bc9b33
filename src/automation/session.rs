//! Session lifecycle for authenticated browser sessions.

use std::time::Duration;

use tokio::time::Instant;

use super::page::AutomationPage;

/// Session state machine.
///
/// `Unauthenticated → LoggingIn → Ready → Executing → Ready (loop)`,
/// terminated by `Evicted`. A session never leaves `Evicted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    LoggingIn,
    Ready,
    Executing,
    Evicted,
}

/// Limits bounding session lifetime.
///
/// Bounded age and use counts keep a session from looking persistently
/// automated; the idle limit bounds resource growth.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub idle: Duration,
    pub max_age: Duration,
    pub max_uses: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(600),
            max_age: Duration::from_secs(3600),
            max_uses: 40,
        }
    }
}

/// One logged-in browser session, exclusively owned by at most one
/// in-flight execution.
pub struct Session {
    pub state: SessionState,
    pub page: Box<dyn AutomationPage>,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub use_count: u32,
}

impl Session {
    pub fn new(page: Box<dyn AutomationPage>) -> Self {
        let now = Instant::now();
        Self {
            state: SessionState::Unauthenticated,
            page,
            created_at: now,
            last_used_at: now,
            use_count: 0,
        }
    }

    /// Reason this session must be evicted before reuse, if any.
    pub fn eviction_reason(&self, limits: &SessionLimits) -> Option<&'static str> {
        let now = Instant::now();
        if now.duration_since(self.last_used_at) > limits.idle {
            return Some("idle timeout");
        }
        if now.duration_since(self.created_at) > limits.max_age {
            return Some("max age exceeded");
        }
        if self.use_count >= limits.max_uses {
            return Some("max uses exceeded");
        }
        None
    }

    /// Record one completed scrape.
    pub fn mark_used(&mut self) {
        self.use_count += 1;
        self.last_used_at = Instant::now();
        self.state = SessionState::Ready;
    }
}
