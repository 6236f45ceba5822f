//! Rate Limiter
//!
//! Token-bucket limiter keyed by caller identifier with bounded memory:
//! buckets are evicted lazily once idle past a TTL, and least-recently-used
//! buckets make room when the tracked-identifier cap is reached. Bucket keys
//! are fixed-length digests; the raw identifier is never retained.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Rate limit exceeded.")]
pub struct RateLimitExceeded;

struct Bucket {
    tokens: f64,
    updated: Instant,
    /// Recency sequence for LRU ordering; exact even when two checks land on
    /// the same clock tick.
    seq: u64,
}

struct BucketTable {
    buckets: HashMap<[u8; 32], Bucket>,
    next_seq: u64,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_second: f64,
    max_identifiers: usize,
    idle_ttl: Duration,
    inner: Mutex<BucketTable>,
}

impl RateLimiter {
    /// `max_requests` tokens refilled per `window`; `burst` overrides the
    /// bucket capacity when set.
    pub fn new(
        max_requests: u32,
        window: Duration,
        burst: Option<u32>,
        max_identifiers: usize,
        idle_ttl: Duration,
    ) -> Self {
        let capacity = f64::from(burst.unwrap_or(max_requests)).max(1.0);
        let refill_per_second = f64::from(max_requests.max(1)) / window.as_secs_f64().max(f64::MIN_POSITIVE);
        Self {
            capacity,
            refill_per_second,
            max_identifiers: max_identifiers.max(1),
            idle_ttl,
            inner: Mutex::new(BucketTable {
                buckets: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Consume one token for the identifier or fail. The critical section is
    /// arithmetic plus map operations only.
    pub fn check(&self, identifier: &str) -> Result<(), RateLimitExceeded> {
        let key = bucket_key(identifier);
        let now = Instant::now();

        let mut table = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let BucketTable { buckets, next_seq } = &mut *table;

        // Lazy sweep of idle buckets; no background timer.
        let idle_ttl = self.idle_ttl;
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.updated) < idle_ttl);

        if !buckets.contains_key(&key) && buckets.len() >= self.max_identifiers {
            if let Some(oldest) = buckets
                .iter()
                .min_by_key(|(_, bucket)| bucket.seq)
                .map(|(key, _)| *key)
            {
                buckets.remove(&oldest);
            }
        }

        *next_seq += 1;
        let seq = *next_seq;

        let bucket = buckets.entry(key).or_insert(Bucket {
            tokens: self.capacity,
            updated: now,
            seq,
        });

        let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.updated = now;

        if bucket.tokens < 1.0 {
            return Err(RateLimitExceeded);
        }
        bucket.tokens -= 1.0;
        bucket.seq = seq;
        Ok(())
    }

    #[cfg(test)]
    fn is_tracked(&self, identifier: &str) -> bool {
        let key = bucket_key(identifier);
        let table = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.buckets.contains_key(&key)
    }

    #[cfg(test)]
    fn tracked_count(&self) -> usize {
        let table = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.buckets.len()
    }
}

fn bucket_key(identifier: &str) -> [u8; 32] {
    Sha256::digest(identifier.as_bytes()).into()
}

/// Limiter handle injected into request handlers. Whether limiting is active
/// is a configuration decision made at construction time, not per call.
pub enum RequestLimiter {
    Enabled(RateLimiter),
    Disabled,
}

impl RequestLimiter {
    pub fn build(
        enabled: bool,
        environment: &str,
        max_requests: u32,
        window: Duration,
        burst: Option<u32>,
        max_identifiers: usize,
        idle_ttl: Duration,
    ) -> Self {
        let test_env = matches!(environment.to_lowercase().as_str(), "test" | "testing");
        if !enabled || test_env || max_requests == 0 || window.is_zero() {
            return Self::Disabled;
        }
        Self::Enabled(RateLimiter::new(
            max_requests,
            window,
            burst,
            max_identifiers,
            idle_ttl,
        ))
    }

    pub fn check(&self, identifier: &str) -> Result<(), RateLimitExceeded> {
        match self {
            Self::Enabled(limiter) => limiter.check(identifier),
            Self::Disabled => Ok(()),
        }
    }
}
