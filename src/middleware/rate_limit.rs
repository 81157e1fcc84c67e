//! Decision rate limiting.
//!
//! One decision per (operator, trade) per second, sliding window. This
//! exists to absorb double-click double-submits from the approval UI; the
//! store's conditional UPDATE remains the real at-most-once guarantee.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::HitlError;

#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum decisions per key per window.
    pub max_requests: u32,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1,
            window: Duration::from_secs(1),
        }
    }
}

/// Limiter keyed by (operator_id, trade_id).
#[derive(Clone)]
pub struct DecisionRateLimiter {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<(String, String), WindowEntry>>>,
}

struct WindowEntry {
    count: u32,
    window_start: Instant,
}

impl DecisionRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record one attempt and decide whether it may proceed.
    pub fn check(&self, operator_id: &str, trade_id: &str) -> Result<(), HitlError> {
        let mut state = self.state.lock();
        let now = Instant::now();

        let entry = state
            .entry((operator_id.to_string(), trade_id.to_string()))
            .or_insert(WindowEntry {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;

        if entry.count > self.config.max_requests {
            let reset_at = entry.window_start + self.config.window;
            Err(HitlError::RateLimited {
                retry_after_secs: reset_at.duration_since(now).as_secs().max(1),
            })
        } else {
            Ok(())
        }
    }

    /// Drop stale windows (call from a background task).
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_submit_in_window_is_rejected() {
        let limiter = DecisionRateLimiter::new(RateLimitConfig::default());
        assert!(limiter.check("alice", "T1").is_ok());
        assert!(matches!(
            limiter.check("alice", "T1"),
            Err(HitlError::RateLimited { .. })
        ));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = DecisionRateLimiter::new(RateLimitConfig::default());
        assert!(limiter.check("alice", "T1").is_ok());
        assert!(limiter.check("alice", "T2").is_ok());
        assert!(limiter.check("bob", "T1").is_ok());
    }

    #[test]
    fn window_resets() {
        let limiter = DecisionRateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_millis(10),
        });
        assert!(limiter.check("alice", "T1").is_ok());
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("alice", "T1").is_ok());
    }

    #[test]
    fn cleanup_retains_fresh_entries() {
        let limiter = DecisionRateLimiter::new(RateLimitConfig::default());
        limiter.check("alice", "T1").unwrap();
        limiter.cleanup();
        // Fresh entry survives; the second attempt still trips the limit.
        assert!(limiter.check("alice", "T1").is_err());
    }
}
