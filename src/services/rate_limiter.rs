//! Per-driver frame rate limiter
//!
//! Tracks inbound frame timestamps per driver so a misbehaving client
//! cannot flood the ingest queues. In-memory, resets on restart; safe to
//! share via `Arc` across async tasks.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;

/// In-memory rate limiter keyed by driver identifier
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
    max_attempts: usize,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window_secs: u64) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
            window_secs,
        }
    }

    /// Check `key` against the limit. Returns `true` if the frame is
    /// allowed, `false` if it is rate-limited. Records the attempt on
    /// `true`.
    pub fn check_and_record(&self, key: &str) -> bool {
        let mut attempts = self.attempts.lock();
        let now = Instant::now();
        let window = std::time::Duration::from_secs(self.window_secs);

        let entry = attempts.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < window);

        if entry.len() >= self.max_attempts {
            return false;
        }
        entry.push(now);
        true
    }

    /// Drop a driver's history (disconnect)
    pub fn forget(&self, key: &str) {
        self.attempts.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_within_limit() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check_and_record("drv-1"));
        assert!(limiter.check_and_record("drv-1"));
        assert!(limiter.check_and_record("drv-1"));
    }

    #[test]
    fn test_blocks_over_limit() {
        let limiter = RateLimiter::new(2, 60);
        limiter.check_and_record("drv-1");
        limiter.check_and_record("drv-1");
        assert!(!limiter.check_and_record("drv-1"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, 60);
        assert!(limiter.check_and_record("drv-1"));
        assert!(!limiter.check_and_record("drv-1"));
        assert!(limiter.check_and_record("drv-2"));
    }

    #[test]
    fn test_forget_resets_key() {
        let limiter = RateLimiter::new(1, 60);
        limiter.check_and_record("drv-1");
        limiter.forget("drv-1");
        assert!(limiter.check_and_record("drv-1"));
    }
}
