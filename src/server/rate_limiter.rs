use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

const PRUNE_EVERY: u64 = 1024;

/// Fixed-window counters keyed by the caller.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts one hit against `key`. Returns false once the key has seen more
    /// than `limit` hits; the counter expires `window` after its first hit.
    async fn try_acquire(&self, key: &str, limit: u32, window: Duration) -> bool;
}

#[derive(Debug)]
struct Counter {
    hits: u32,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct InMemoryRateLimiter {
    counters: DashMap<String, Counter>,
    calls: AtomicU64,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired counters.
    pub fn prune(&self) {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, counter| counter.expires_at > now);
        let removed = before.saturating_sub(self.counters.len());
        if removed > 0 {
            debug!(removed, "Pruned expired rate limit counters.");
        }
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn try_acquire(&self, key: &str, limit: u32, window: Duration) -> bool {
        if self.calls.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }

        let now = Instant::now();
        let mut counter = self.counters.entry(key.to_string()).or_insert(Counter {
            hits: 0,
            expires_at: now + window,
        });
        if counter.expires_at <= now {
            counter.hits = 0;
            counter.expires_at = now + window;
        }
        counter.hits = counter.hits.saturating_add(1);
        counter.hits <= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_per_key() {
        let limiter = InMemoryRateLimiter::new();
        let window = Duration::from_secs(60);
        for _ in 0..5 {
            assert!(limiter.try_acquire("1:production:100", 5, window).await);
        }
        assert!(!limiter.try_acquire("1:production:100", 5, window).await);
        assert!(limiter.try_acquire("1:staging:100", 5, window).await);
        assert!(limiter.try_acquire("1:production:101", 5, window).await);
    }

    #[tokio::test]
    async fn test_expired_counters() {
        let limiter = InMemoryRateLimiter::new();
        assert!(limiter.try_acquire("k", 1, Duration::ZERO).await);
        // Zero-length window: every call starts a fresh counter.
        assert!(limiter.try_acquire("k", 1, Duration::ZERO).await);
        limiter.prune();
        assert!(limiter.is_empty());
    }
}
