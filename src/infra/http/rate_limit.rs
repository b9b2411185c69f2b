use std::time::Instant;

use dashmap::DashMap;

/// Per-client token bucket limiter.
///
/// Buckets refill continuously at `rate` tokens per second up to `burst`;
/// a request with no token available is rejected. Buckets are created on
/// first sight of a client key.
#[derive(Debug)]
pub struct IpRateLimiter {
    rate: f64,
    burst: f64,
    buckets: DashMap<String, TokenBucket>,
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    refilled_at: Instant,
}

impl IpRateLimiter {
    pub fn new(rate: f64, burst: f64) -> Self {
        let burst = burst.max(rate).max(1.0);
        Self {
            rate,
            burst,
            buckets: DashMap::new(),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket {
                tokens: self.burst,
                refilled_at: now,
            });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
