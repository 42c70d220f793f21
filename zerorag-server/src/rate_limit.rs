//! Per-remote token-bucket rate limiting.
//!
//! One bucket per remote address, refilled continuously at the configured
//! per-minute rate. Buckets live in a concurrent map; stale entries are
//! pruned by the connection reaper's cadence via [`RateLimiter::prune`].

use std::net::IpAddr;
use std::time::Instant;

use dashmap::DashMap;

/// Verdict for one request, including header material.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the bucket next admits a request.
    pub reset_secs: u64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

/// Token-bucket limiter keyed by remote IP.
pub struct RateLimiter {
    limit_per_minute: u32,
    buckets: DashMap<IpAddr, Bucket>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self { limit_per_minute: limit_per_minute.max(1), buckets: DashMap::new() }
    }

    /// Try to admit one request from `remote`.
    pub fn check(&self, remote: IpAddr) -> RateDecision {
        let now = Instant::now();
        let rate_per_sec = self.limit_per_minute as f64 / 60.0;
        let capacity = self.limit_per_minute as f64;

        let mut bucket = self.buckets.entry(remote).or_insert_with(|| Bucket {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate_per_sec).min(capacity);
        bucket.last_refill = now;
        bucket.last_seen = now;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        let remaining = bucket.tokens.floor().max(0.0) as u32;
        let reset_secs = if bucket.tokens >= 1.0 {
            0
        } else {
            ((1.0 - bucket.tokens) / rate_per_sec).ceil() as u64
        };
        RateDecision { allowed, limit: self.limit_per_minute, remaining, reset_secs }
    }

    /// Drop buckets idle longer than `idle_secs`.
    pub fn prune(&self, idle_secs: u64) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_seen).as_secs() < idle_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn admits_up_to_the_limit_then_rejects() {
        let limiter = RateLimiter::new(5);
        for i in 0..5 {
            let decision = limiter.check(ip(1));
            assert!(decision.allowed, "request {i} should pass");
        }
        let decision = limiter.check(ip(1));
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert!(decision.reset_secs > 0);
    }

    #[test]
    fn remotes_have_independent_buckets() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check(ip(1)).allowed);
        assert!(!limiter.check(ip(1)).allowed);
        assert!(limiter.check(ip(2)).allowed);
    }

    #[test]
    fn remaining_counts_down() {
        let limiter = RateLimiter::new(3);
        assert_eq!(limiter.check(ip(9)).remaining, 2);
        assert_eq!(limiter.check(ip(9)).remaining, 1);
        assert_eq!(limiter.check(ip(9)).remaining, 0);
    }

    #[test]
    fn prune_drops_idle_buckets() {
        let limiter = RateLimiter::new(1);
        limiter.check(ip(3));
        assert_eq!(limiter.buckets.len(), 1);
        limiter.prune(0);
        assert_eq!(limiter.buckets.len(), 0);
    }
}
