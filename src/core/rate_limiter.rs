//! Per-client fixed-window rate limiting.
//!
//! `FixedWindowLimiter` keeps one `ClientBucket` per client identity in a
//! single mutex-guarded map. A check resets the bucket when its window has
//! elapsed, then admits while `count < limit`. The whole check-and-update
//! runs under the lock, so at most `limit` requests are admitted per window
//! per client no matter how many tasks race on the same key.
//!
//! Limiter state is owned by an explicit instance; each server creates (or is
//! handed) its own.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

use crate::config::models::RateLimitSettings;

pub const DEFAULT_LIMIT: u32 = 100;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct ClientBucket {
    count: u32,
    window_start: Instant,
}

/// Outcome of a single limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the client's current window ends.
    pub reset_in: Duration,
    /// Wall-clock instant at which the window resets, fixed when the
    /// decision was made.
    pub reset_at: DateTime<Utc>,
}

/// Wall-clock time `reset_in` from now, clamped to the latest representable
/// instant.
fn wall_clock_after(reset_in: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(reset_in)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Fixed-window request counter keyed by client identity.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    buckets: Mutex<HashMap<String, ClientBucket>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(settings.requests, settings.window())
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check and count one request for `key`. The empty string is a valid
    /// (shared) key.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    /// Same as [`check`](Self::check) against an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let mut buckets = self.lock();
        let bucket = buckets.entry(key.to_string()).or_insert(ClientBucket {
            count: 0,
            window_start: now,
        });

        if now.saturating_duration_since(bucket.window_start) >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
        }

        // a window too long to represent never ends
        let reset_in = bucket
            .window_start
            .checked_add(self.window)
            .map_or(self.window, |end| end.saturating_duration_since(now));
        let allowed = bucket.count < self.limit;
        if allowed {
            bucket.count += 1;
        }
        let remaining = self.limit - bucket.count;
        drop(buckets);

        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining,
            reset_in,
            reset_at: wall_clock_after(reset_in),
        }
    }

    /// Drop buckets whose window has elapsed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < self.window);
        before - buckets.len()
    }

    /// Number of client identities currently holding a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    // A panic while holding the lock cannot leave a bucket half-updated, so
    // a poisoned map is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn admits_up_to_limit_then_denies() {
        let limiter = FixedWindowLimiter::new(5, Duration::from_secs(60));
        let now = Instant::now();

        let mut last_remaining = u32::MAX;
        for _ in 0..5 {
            let decision = limiter.check_at("10.0.0.1", now);
            assert!(decision.allowed);
            assert!(decision.remaining < last_remaining);
            last_remaining = decision.remaining;
        }
        assert_eq!(last_remaining, 0);

        let denied = limiter.check_at("10.0.0.1", now);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.limit, 5);
    }

    #[test]
    fn window_elapse_resets_counter() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.check_at("a", start).allowed);
        assert!(limiter.check_at("a", start).allowed);
        assert!(!limiter.check_at("a", start + Duration::from_millis(999)).allowed);

        let after = limiter.check_at("a", start + Duration::from_secs(1));
        assert!(after.allowed);
        assert_eq!(after.remaining, 1);
        assert_eq!(after.reset_in, Duration::from_secs(1));
    }

    #[test]
    fn reset_in_counts_down_within_window() {
        let limiter = FixedWindowLimiter::new(10, Duration::from_secs(60));
        let start = Instant::now();
        limiter.check_at("a", start);
        let later = limiter.check_at("a", start + Duration::from_secs(15));
        assert_eq!(later.reset_in, Duration::from_secs(45));
    }

    #[test]
    fn identities_are_independent() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.check_at("a", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(limiter.check_at("", now).allowed);
        assert!(!limiter.check_at("", now).allowed);
    }

    #[test]
    fn concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(FixedWindowLimiter::new(50, Duration::from_secs(60)));
        let clients = ["alpha", "beta", "gamma", "delta"];

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let limiter = limiter.clone();
                let key = clients[i % clients.len()];
                thread::spawn(move || (0..40).filter(|_| limiter.check(key).allowed).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // four threads per client, 160 attempts each, 50 admitted each
        assert_eq!(admitted, 50 * clients.len());
        assert_eq!(limiter.tracked_clients(), clients.len());
    }

    #[test]
    fn sweep_removes_only_expired_buckets() {
        let limiter = FixedWindowLimiter::new(10, Duration::from_secs(10));
        let start = Instant::now();

        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::from_secs(8));
        assert_eq!(limiter.tracked_clients(), 2);

        let removed = limiter.sweep_expired_at(start + Duration::from_secs(12));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_clients(), 1);

        // a swept client starts a fresh window
        let decision = limiter.check_at("old", start + Duration::from_secs(12));
        assert_eq!(decision.remaining, 9);
    }

    #[test]
    fn reset_instant_is_fixed_at_decision_time() {
        let limiter = FixedWindowLimiter::new(10, Duration::from_secs(60));
        let before = Utc::now();
        let decision = limiter.check("a");
        let after = Utc::now();

        thread::sleep(Duration::from_millis(20));
        // reading it later does not move it
        assert!(decision.reset_at >= before + chrono::Duration::seconds(59));
        assert!(decision.reset_at <= after + chrono::Duration::seconds(60));
    }

    #[test]
    fn enormous_windows_do_not_overflow() {
        let window = humantime::parse_duration("500000000000years").unwrap();
        let limiter = FixedWindowLimiter::new(2, window);

        let first = limiter.check("a");
        assert!(first.allowed);
        assert_eq!(first.reset_in, window);
        assert_eq!(first.reset_at, DateTime::<Utc>::MAX_UTC);

        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert_eq!(limiter.sweep_expired(), 0);
    }

    #[test]
    fn defaults_are_one_hundred_per_minute() {
        let limiter = FixedWindowLimiter::default();
        assert_eq!(limiter.limit(), 100);
        assert_eq!(limiter.window(), Duration::from_secs(60));
    }
}
