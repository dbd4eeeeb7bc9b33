//! Adaptive per-service concurrency gate.
//!
//! Each service gets a semaphore bounding concurrent automation sessions
//! plus a minimum spacing between actions derived from the configured
//! actions-per-minute budget. Anti-bot blocks raise an additional penalty
//! delay; consecutive successes decay it back to zero.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitSettings;

/// Permit held for the duration of one scrape's network activity.
///
/// Dropping the permit releases the service's concurrency slot.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

struct GateState {
    /// Earliest instant the next action may start.
    next_slot: Option<Instant>,
    /// Extra delay currently imposed on top of the base spacing.
    penalty: Duration,
}

/// Gate for one service.
pub struct ServiceGate {
    semaphore: Arc<Semaphore>,
    spacing: Duration,
    penalty_multiplier: f64,
    max_penalty: Duration,
    state: Mutex<GateState>,
}

impl ServiceGate {
    pub fn new(
        concurrency: usize,
        actions_per_minute: u32,
        penalty_multiplier: f64,
        max_penalty: Duration,
    ) -> Self {
        let spacing = if actions_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(60_000 / actions_per_minute as u64)
        };
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            spacing,
            penalty_multiplier,
            max_penalty,
            state: Mutex::new(GateState {
                next_slot: None,
                penalty: Duration::ZERO,
            }),
        }
    }

    /// Wait for a concurrency slot and the next pacing slot.
    ///
    /// Cancellation-safe: dropping the future releases everything.
    pub async fn acquire(&self) -> GatePermit {
        // Semaphore is never closed, so acquire cannot fail.
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("gate semaphore closed");

        let wait = {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            let start = match state.next_slot {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            state.next_slot = Some(start + self.spacing + state.penalty);
            start - now
        };

        if wait > Duration::ZERO {
            debug!("gate pacing: waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        GatePermit { _permit: permit }
    }

    /// Report a successful action; decays the penalty.
    pub async fn report_success(&self) {
        let mut state = self.state.lock().await;
        if state.penalty > Duration::ZERO {
            state.penalty /= 2;
            if state.penalty < self.spacing {
                state.penalty = Duration::ZERO;
            }
        }
    }

    /// Report an anti-bot block; raises the penalty aggressively.
    pub async fn report_blocked(&self) {
        let mut state = self.state.lock().await;
        let base = if state.penalty.is_zero() {
            self.spacing.max(Duration::from_secs(1))
        } else {
            state.penalty
        };
        let raised = base.mul_f64(self.penalty_multiplier);
        state.penalty = raised.min(self.max_penalty);
        warn!("gate penalty raised to {:?}", state.penalty);
    }

    /// Current penalty delay.
    pub async fn penalty(&self) -> Duration {
        self.state.lock().await.penalty
    }

    /// Number of free concurrency slots right now.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Registry of gates, one per service, created on first use.
#[derive(Clone)]
pub struct ServiceGates {
    settings: RateLimitSettings,
    gates: Arc<Mutex<HashMap<String, Arc<ServiceGate>>>>,
}

impl ServiceGates {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Gate for a service, applying any per-service override.
    pub async fn gate(&self, service_id: &str) -> Arc<ServiceGate> {
        let mut gates = self.gates.lock().await;
        if let Some(gate) = gates.get(service_id) {
            return gate.clone();
        }

        let override_cfg = self.settings.services.get(service_id);
        let concurrency = override_cfg
            .and_then(|o| o.concurrency)
            .unwrap_or(self.settings.default_concurrency);
        let actions_per_minute = override_cfg
            .and_then(|o| o.actions_per_minute)
            .unwrap_or(self.settings.actions_per_minute);

        let gate = Arc::new(ServiceGate::new(
            concurrency,
            actions_per_minute,
            self.settings.penalty_multiplier,
            Duration::from_secs(self.settings.max_penalty_secs),
        ));
        gates.insert(service_id.to_string(), gate.clone());
        gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_gate(concurrency: usize) -> ServiceGate {
        // 6000 actions/minute = 10ms spacing, fast enough for tests
        ServiceGate::new(concurrency, 6000, 2.0, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_never_exceeded() {
        let gate = Arc::new(fast_gate(2));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let current = current.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = gate.acquire().await;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_actions_are_spaced() {
        let gate = fast_gate(4);
        let start = Instant::now();
        for _ in 0..3 {
            let _permit = gate.acquire().await;
        }
        // Three acquisitions at 10ms spacing: at least 20ms total
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_blocked_raises_penalty_and_success_decays_it() {
        let gate = fast_gate(1);
        assert_eq!(gate.penalty().await, Duration::ZERO);

        gate.report_blocked().await;
        let first = gate.penalty().await;
        assert!(first > Duration::ZERO);

        gate.report_blocked().await;
        let second = gate.penalty().await;
        assert!(second > first);

        // Penalties are capped
        for _ in 0..32 {
            gate.report_blocked().await;
        }
        assert!(gate.penalty().await <= Duration::from_secs(60));

        // Success decays back to zero eventually
        for _ in 0..32 {
            gate.report_success().await;
        }
        assert_eq!(gate.penalty().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_gates_apply_service_overrides() {
        let mut settings = RateLimitSettings::default();
        settings.services.insert(
            "picky".to_string(),
            crate::config::ServiceLimitOverride {
                concurrency: Some(1),
                actions_per_minute: None,
            },
        );
        let gates = ServiceGates::new(settings);

        let default_gate = gates.gate("normal").await;
        let picky_gate = gates.gate("picky").await;
        assert_eq!(default_gate.available_slots(), 2);
        assert_eq!(picky_gate.available_slots(), 1);

        // Same service returns the same gate
        let again = gates.gate("picky").await;
        assert!(Arc::ptr_eq(&picky_gate, &again));
    }
}
