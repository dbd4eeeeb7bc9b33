//! Cadence math: jitter and backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

/// Next run time after a successful run: `last + interval + jitter`.
///
/// The jitter is uniform in `0..=random_range_seconds`, desynchronizing
/// configs that share an interval so the target site never sees a
/// clockwork pattern.
pub fn next_run_at(
    last_run: DateTime<Utc>,
    interval_seconds: u32,
    random_range_seconds: u32,
) -> DateTime<Utc> {
    let jitter = if random_range_seconds == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=random_range_seconds as i64)
    };
    last_run + chrono::Duration::seconds(interval_seconds as i64 + jitter)
}

/// Backoff delay after `weighted_failures` consecutive failures:
/// `min(max_backoff, interval * 2^min(failures, cap))`.
pub fn backoff_delay(
    interval_seconds: u32,
    weighted_failures: u32,
    exponent_cap: u32,
    max_backoff: Duration,
) -> Duration {
    let exponent = weighted_failures.min(exponent_cap);
    let factor = 1u64 << exponent.min(62);
    let delay = (interval_seconds as u64).saturating_mul(factor);
    Duration::from_secs(delay.min(max_backoff.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_in_range() {
        let last = Utc::now();
        for _ in 0..200 {
            let next = next_run_at(last, 60, 15);
            let delta = (next - last).num_seconds();
            assert!((60..=75).contains(&delta), "delta {} out of range", delta);
        }
    }

    #[test]
    fn test_zero_jitter_is_exact() {
        let last = Utc::now();
        let next = next_run_at(last, 300, 0);
        assert_eq!((next - last).num_seconds(), 300);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let max = Duration::from_secs(6 * 3600);
        let mut previous = Duration::ZERO;
        for failures in 0..20 {
            let delay = backoff_delay(60, failures, 6, max);
            assert!(delay >= previous, "backoff decreased at {}", failures);
            assert!(delay <= max);
            previous = delay;
        }
        // At the exponent cap the delay stops growing
        assert_eq!(backoff_delay(60, 6, 6, max), backoff_delay(60, 19, 6, max));
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let max = Duration::from_secs(100_000);
        assert_eq!(backoff_delay(60, 0, 6, max), Duration::from_secs(60));
        assert_eq!(backoff_delay(60, 1, 6, max), Duration::from_secs(120));
        assert_eq!(backoff_delay(60, 3, 6, max), Duration::from_secs(480));
    }

    #[test]
    fn test_backoff_respects_max() {
        let max = Duration::from_secs(500);
        assert_eq!(backoff_delay(60, 10, 10, max), Duration::from_secs(500));
    }
}
