//! Per-record retry scheduling after failed remote operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::clock::Clock;
use crate::models::LocalId;

/// Exponential retry delays: `base * 2^(failures - 1)`, capped at `max`.
///
/// There is no retry limit; a failing record is attempted again at most
/// `max` after its last failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1_u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    failures: u32,
    retry_at: i64,
}

/// Tracks which records are waiting out a retry delay.
pub struct Backoff {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<LocalId, Entry>>,
}

impl Backoff {
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `local_id` may be attempted now.
    pub fn is_ready(&self, local_id: &LocalId) -> bool {
        let now = self.clock.now_millis();
        self.lock()
            .get(local_id)
            .map_or(true, |entry| now >= entry.retry_at)
    }

    /// Register a failure and return the delay until the next attempt.
    pub fn record_failure(&self, local_id: LocalId) -> Duration {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let entry = entries.entry(local_id).or_insert(Entry {
            failures: 0,
            retry_at: now,
        });
        entry.failures = entry.failures.saturating_add(1);
        let delay = self.policy.delay_after(entry.failures);
        let delay_millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        entry.retry_at = now.saturating_add(delay_millis);
        delay
    }

    pub fn record_success(&self, local_id: &LocalId) {
        self.lock().remove(local_id);
    }

    #[must_use]
    pub fn failures(&self, local_id: &LocalId) -> u32 {
        self.lock().get(local_id).map_or(0, |entry| entry.failures)
    }

    /// Forget records for which `keep` returns `false`.
    pub fn retain(&self, keep: impl Fn(&LocalId) -> bool) {
        self.lock().retain(|local_id, _| keep(local_id));
    }

    /// Make every record eligible immediately.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<LocalId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = RetryPolicy::default();
        let delays = (0..=6)
            .map(|failures| policy.delay_after(failures).as_secs())
            .collect::<Vec<_>>();
        assert_eq!(delays, vec![0, 30, 60, 120, 240, 300, 300]);
        assert_eq!(policy.delay_after(u32::MAX), policy.max);
    }

    #[test]
    fn failed_record_waits_for_its_window() {
        let clock = Arc::new(ManualClock::new(0));
        let backoff = Backoff::new(RetryPolicy::default(), clock.clone());
        let local_id = LocalId::new();

        assert!(backoff.is_ready(&local_id));
        backoff.record_failure(local_id);
        assert!(!backoff.is_ready(&local_id));

        clock.advance(29_999);
        assert!(!backoff.is_ready(&local_id));
        clock.advance(1);
        assert!(backoff.is_ready(&local_id));

        assert_eq!(backoff.record_failure(local_id), Duration::from_secs(60));
        assert_eq!(backoff.failures(&local_id), 2);
    }

    #[test]
    fn success_and_clear_reset_the_schedule() {
        let clock = Arc::new(ManualClock::new(0));
        let backoff = Backoff::new(RetryPolicy::default(), clock);
        let first = LocalId::new();
        let second = LocalId::new();

        backoff.record_failure(first);
        backoff.record_failure(second);
        backoff.record_success(&first);
        assert!(backoff.is_ready(&first));
        assert_eq!(backoff.failures(&first), 0);
        assert!(!backoff.is_ready(&second));

        backoff.clear();
        assert!(backoff.is_ready(&second));
    }

    #[test]
    fn retain_drops_entries_of_other_records() {
        let backoff = Backoff::new(RetryPolicy::default(), Arc::new(ManualClock::new(0)));
        let kept = LocalId::new();
        let gone = LocalId::new();
        backoff.record_failure(kept);
        backoff.record_failure(gone);

        backoff.retain(|local_id| *local_id == kept);

        assert_eq!(backoff.failures(&kept), 1);
        assert_eq!(backoff.failures(&gone), 0);
    }
}
