//! Sliding-window rate limiter for handshake attempts.
//!
//! Keeps per-key attempt timestamps and forgets those older than the window.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// At most `limit` attempts per key in any `window`-long span.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    /// Attempt times per key, oldest first.
    history: HashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            history: HashMap::new(),
        }
    }

    /// Record an attempt for `key` unless it is over the limit.
    /// `false` means the attempt was refused and not recorded.
    pub fn check_and_record(&mut self, key: &str) -> bool {
        self.check_and_record_at(key, Instant::now())
    }

    fn check_and_record_at(&mut self, key: &str, now: Instant) -> bool {
        let recent = self.history.entry(key.to_owned()).or_default();
        if let Some(cutoff) = now.checked_sub(self.window) {
            let expired = recent.partition_point(|t| *t <= cutoff);
            recent.drain(..expired);
        }
        if recent.len() >= self.limit as usize {
            return false;
        }
        recent.push(now);
        true
    }

    /// Forget keys with no attempt inside the current window.
    pub fn gc(&mut self) {
        let Some(cutoff) = Instant::now().checked_sub(self.window) else {
            return;
        };
        self.history
            .retain(|_, recent| recent.last().is_some_and(|t| *t > cutoff));
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.history.len()
    }
}

/// Per-IP limiter for WebSocket handshakes.
#[derive(Debug)]
pub struct HandshakeLimiter {
    /// `None` when limiting is disabled.
    limiter: Option<RateLimiter>,
    /// Handshakes checked since the last GC sweep.
    since_gc: u32,
}

/// Run a GC sweep every this many checks.
const GC_EVERY: u32 = 1024;

impl HandshakeLimiter {
    /// Allow `per_minute` handshakes per client IP. Zero disables limiting.
    pub fn per_minute(per_minute: u32) -> Self {
        Self {
            limiter: (per_minute > 0)
                .then(|| RateLimiter::new(per_minute, Duration::from_secs(60))),
            since_gc: 0,
        }
    }

    /// Check if a handshake from the given IP is allowed.
    pub fn check(&mut self, ip: &IpAddr) -> bool {
        let Some(limiter) = self.limiter.as_mut() else {
            return true;
        };
        self.since_gc += 1;
        if self.since_gc >= GC_EVERY {
            self.since_gc = 0;
            limiter.gc();
        }
        limiter.check_and_record(&ip.to_string())
    }
}
