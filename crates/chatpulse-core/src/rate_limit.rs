//! Sliding-window rate limiting per (actor, action).
//!
//! Each key owns a queue of request instants. A check prunes instants older
//! than the interval, then either records the new request or rejects it with
//! the time until the oldest retained request leaves the window. Pruning is
//! lazy: it only happens when the key is checked (or swept).
//!
//! The outer map lock is held only long enough to find or create a key's
//! ledger; the check-then-record step runs under that key's own lock, so
//! distinct keys never contend with each other.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    /// Recorded. `remaining` more requests fit in the current window.
    Allowed { remaining: u32 },
    /// Not recorded.
    Rejected {
        #[serde(with = "crate::error::duration_ms")]
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Admission::Allowed { .. } => None,
            Admission::Rejected { retry_after } => Some(*retry_after),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    actor: String,
    action: String,
}

type Ledger = Arc<Mutex<VecDeque<Instant>>>;

#[derive(Default)]
pub struct RateLimiter {
    ledgers: Mutex<HashMap<LedgerKey, Ledger>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check_and_record(
        &self,
        actor_id: &str,
        action: &str,
        limit: u32,
        interval: Duration,
    ) -> Admission {
        self.check_and_record_at(actor_id, action, limit, interval, Instant::now())
    }

    /// Same as [`check_and_record`](Self::check_and_record) with an explicit clock reading.
    pub fn check_and_record_at(
        &self,
        actor_id: &str,
        action: &str,
        limit: u32,
        interval: Duration,
        now: Instant,
    ) -> Admission {
        if limit == 0 {
            return Admission::Rejected {
                retry_after: interval,
            };
        }

        let ledger = self.ledger(actor_id, action);
        let mut stamps = ledger.lock();

        prune(&mut stamps, interval, now);

        if stamps.len() >= limit as usize {
            // Non-empty: limit > 0 and len >= limit.
            let oldest = stamps.front().copied().unwrap_or(now);
            let waited = now.saturating_duration_since(oldest);
            let retry_after = interval.saturating_sub(waited);
            tracing::debug!(
                actor = actor_id,
                action,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit hit"
            );
            return Admission::Rejected { retry_after };
        }

        stamps.push_back(now);
        Admission::Allowed {
            remaining: limit - stamps.len() as u32,
        }
    }

    /// Requests still inside the window for this key.
    pub fn in_window(&self, actor_id: &str, action: &str, interval: Duration, now: Instant) -> usize {
        let key = LedgerKey {
            actor: actor_id.to_string(),
            action: action.to_string(),
        };
        let Some(ledger) = self.ledgers.lock().get(&key).cloned() else {
            return 0;
        };
        let stamps = ledger.lock();
        stamps
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < interval)
            .count()
    }

    /// Drop every ledger of `actor_id`.
    pub fn forget_actor(&self, actor_id: &str) {
        self.ledgers.lock().retain(|k, _| k.actor != actor_id);
    }

    /// Drop ledgers whose newest request is older than `max_interval`.
    /// Returns how many keys were removed.
    pub fn sweep(&self, max_interval: Duration, now: Instant) -> usize {
        let mut ledgers = self.ledgers.lock();
        let before = ledgers.len();
        ledgers.retain(|_, ledger| {
            let stamps = ledger.lock();
            stamps
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < max_interval)
        });
        before - ledgers.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.ledgers.lock().len()
    }

    fn ledger(&self, actor_id: &str, action: &str) -> Ledger {
        let key = LedgerKey {
            actor: actor_id.to_string(),
            action: action.to_string(),
        };
        self.ledgers.lock().entry(key).or_default().clone()
    }
}

fn prune(stamps: &mut VecDeque<Instant>, interval: Duration, now: Instant) {
    while let Some(front) = stamps.front() {
        if now.saturating_duration_since(*front) >= interval {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn sixth_call_in_window_is_rejected() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();
        for i in 0..5 {
            let at = t0 + Duration::from_secs(i);
            assert!(rl.check_and_record_at("amy", "purge", 5, MINUTE, at).is_allowed());
        }
        let sixth = rl.check_and_record_at("amy", "purge", 5, MINUTE, t0 + Duration::from_secs(10));
        assert_eq!(sixth.retry_after(), Some(Duration::from_secs(50)));
    }

    #[test]
    fn first_call_after_window_elapses_is_allowed() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();
        for _ in 0..5 {
            rl.check_and_record_at("amy", "purge", 5, MINUTE, t0);
        }
        assert!(!rl.check_and_record_at("amy", "purge", 5, MINUTE, t0 + Duration::from_secs(59)).is_allowed());
        assert!(rl.check_and_record_at("amy", "purge", 5, MINUTE, t0 + MINUTE).is_allowed());
    }

    #[test]
    fn rejected_calls_are_not_recorded() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();
        rl.check_and_record_at("amy", "send", 1, MINUTE, t0);
        for s in 1..10 {
            rl.check_and_record_at("amy", "send", 1, MINUTE, t0 + Duration::from_secs(s));
        }
        assert!(rl.check_and_record_at("amy", "send", 1, MINUTE, t0 + MINUTE).is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();
        assert!(rl.check_and_record_at("amy", "purge", 1, MINUTE, t0).is_allowed());
        assert!(rl.check_and_record_at("amy", "send", 1, MINUTE, t0).is_allowed());
        assert!(rl.check_and_record_at("bob", "purge", 1, MINUTE, t0).is_allowed());
        assert!(!rl.check_and_record_at("amy", "purge", 1, MINUTE, t0).is_allowed());
    }

    #[test]
    fn concurrent_callers_cannot_oversubscribe() {
        let rl = RateLimiter::new();
        let allowed = std::sync::atomic::AtomicU32::new(0);
        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    if rl.check_and_record("amy", "purge", 5, MINUTE).is_allowed() {
                        allowed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(allowed.into_inner(), 5);
    }

    #[test]
    fn sweep_drops_idle_keys() {
        let rl = RateLimiter::new();
        let t0 = Instant::now();
        rl.check_and_record_at("amy", "purge", 5, MINUTE, t0);
        rl.check_and_record_at("bob", "purge", 5, MINUTE, t0 + MINUTE);
        assert_eq!(rl.sweep(MINUTE, t0 + MINUTE + Duration::from_secs(1)), 1);
        assert_eq!(rl.tracked_keys(), 1);
        rl.forget_actor("bob");
        assert_eq!(rl.tracked_keys(), 0);
    }

    #[test]
    fn zero_limit_always_rejects() {
        let rl = RateLimiter::new();
        let d = rl.check_and_record("amy", "purge", 0, MINUTE);
        assert_eq!(d.retry_after(), Some(MINUTE));
    }

    proptest! {
        #[test]
        fn window_never_exceeds_limit(
            limit in 1u32..6,
            offsets in proptest::collection::vec(0u64..180, 1..60)
        ) {
            let rl = RateLimiter::new();
            let t0 = Instant::now();
            let mut sorted = offsets.clone();
            sorted.sort_unstable();
            for off in sorted {
                let now = t0 + Duration::from_secs(off);
                let decision = rl.check_and_record_at("p", "a", limit, MINUTE, now);
                prop_assert!(rl.in_window("p", "a", MINUTE, now) <= limit as usize);
                if let Some(wait) = decision.retry_after() {
                    prop_assert!(wait > Duration::ZERO && wait <= MINUTE);
                }
            }
        }
    }
}
