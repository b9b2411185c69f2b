use std::time::{Duration, SystemTime};

use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;

/// A fully materialized prior response.
///
/// Only complete `200 OK` responses are ever admitted; partial, redirect, or
/// error responses never become entries. Mutations replace the whole entry,
/// except for the `stored_at` bump when a conditional fetch comes back
/// `304 Not Modified`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub body: Bytes,
    /// Origin-derived response headers. `HeaderMap` is an order-preserving
    /// multimap and clones deeply, so a served copy can never corrupt the
    /// cached original.
    pub headers: HeaderMap,
    pub status: StatusCode,
    /// Instant the entry was admitted or last revalidated.
    pub stored_at: SystemTime,
    /// Freshness window.
    pub ttl: Duration,
    /// Window beyond `ttl` during which the entry may still be served while
    /// a revalidation runs.
    pub stale_ttl: Duration,
    pub size: u64,
    pub etag: String,
    pub last_modified: Option<SystemTime>,
}

impl CacheEntry {
    /// The entry is within its freshness window at `now`.
    pub fn fresh(&self, now: SystemTime) -> bool {
        now < self.stored_at + self.ttl
    }

    /// The freshness window has passed but the stale window has not.
    pub fn stale_but_valid(&self, now: SystemTime) -> bool {
        !self.fresh(now) && now < self.stored_at + self.ttl + self.stale_ttl
    }

    /// Whole seconds since admission, clamped at zero for clock skew.
    pub fn age(&self, now: SystemTime) -> u64 {
        now.duration_since(self.stored_at)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ttl_secs: u64, stale_secs: u64) -> CacheEntry {
        CacheEntry {
            body: Bytes::from_static(b"hello"),
            headers: HeaderMap::new(),
            status: StatusCode::OK,
            stored_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000),
            ttl: Duration::from_secs(ttl_secs),
            stale_ttl: Duration::from_secs(stale_secs),
            size: 5,
            etag: String::new(),
            last_modified: None,
        }
    }

    fn at(offset_secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000 + offset_secs)
    }

    #[test]
    fn fresh_within_ttl() {
        let entry = entry(60, 120);
        assert!(entry.fresh(at(0)));
        assert!(entry.fresh(at(59)));
        assert!(!entry.fresh(at(60)));
    }

    #[test]
    fn fresh_excludes_stale_but_valid() {
        let entry = entry(60, 120);
        for offset in [0, 30, 59, 60, 90, 179, 180, 500] {
            let now = at(offset);
            if entry.fresh(now) {
                assert!(!entry.stale_but_valid(now), "offset {offset}");
            }
        }
    }

    #[test]
    fn stale_window_bounds() {
        let entry = entry(60, 120);
        assert!(!entry.stale_but_valid(at(59)));
        assert!(entry.stale_but_valid(at(60)));
        assert!(entry.stale_but_valid(at(179)));
        assert!(!entry.stale_but_valid(at(180)));
    }

    #[test]
    fn zero_ttl_is_never_fresh() {
        let zero = entry(0, 0);
        assert!(!zero.fresh(zero.stored_at));

        let positive = entry(1, 0);
        assert!(positive.fresh(positive.stored_at));
    }

    #[test]
    fn age_is_non_negative_whole_seconds() {
        let entry = entry(60, 120);
        assert_eq!(entry.age(at(0)), 0);
        assert_eq!(entry.age(at(10)), 10);
        // Clock moved backwards relative to admission.
        assert_eq!(entry.age(SystemTime::UNIX_EPOCH), 0);
    }
}
