use std::{
    num::NonZeroUsize,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use lru::LruCache;
use thiserror::Error;
use tracing::warn;

use super::entry::CacheEntry;

type Entries = LruCache<String, Arc<CacheEntry>>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache capacity must be greater than zero")]
    InvalidCapacity,
}

/// Bounded LRU of cached responses, keyed by object path.
///
/// Eviction is strict LRU on access: `get` promotes the entry under the same
/// guard that reads it, so a lookup can never interleave with an eviction of
/// the same key. Writers are serialized against each other and against
/// readers for the duration of a single mutation; all operations after
/// construction are infallible. A panic while the lock is held poisons it;
/// the guard accessors recover and keep serving, trading the poison signal
/// for availability.
pub struct ObjectCache {
    entries: RwLock<Entries>,
    default_ttl: Duration,
    default_stale_ttl: Duration,
    capacity: usize,
}

impl ObjectCache {
    pub fn new(
        capacity: usize,
        default_ttl: Duration,
        default_stale_ttl: Duration,
    ) -> Result<Self, CacheError> {
        let bound = NonZeroUsize::new(capacity).ok_or(CacheError::InvalidCapacity)?;
        Ok(Self {
            entries: RwLock::new(LruCache::new(bound)),
            default_ttl,
            default_stale_ttl,
            capacity,
        })
    }

    /// Look up an entry, promoting it to most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.entries_mut("get").get(key).cloned()
    }

    /// Admit or replace an entry. A zero `ttl` or `stale_ttl` is substituted
    /// with the configured default; on capacity overflow the least recently
    /// used entry is evicted.
    pub fn set(&self, key: String, mut entry: CacheEntry) {
        if entry.ttl.is_zero() {
            entry.ttl = self.default_ttl;
        }
        if entry.stale_ttl.is_zero() {
            entry.stale_ttl = self.default_stale_ttl;
        }
        self.entries_mut("set").put(key, Arc::new(entry));
    }

    pub fn delete(&self, key: &str) {
        self.entries_mut("delete").pop(key);
    }

    /// Current entry count and the configured capacity.
    pub fn stats(&self) -> (usize, usize) {
        let size = self.entries_ref("stats").len();
        (size, self.capacity)
    }

    fn entries_ref(&self, op: &'static str) -> RwLockReadGuard<'_, Entries> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    "recovered poisoned cache store lock; entries may be stale after a panic in another thread"
                );
                poisoned.into_inner()
            }
        }
    }

    // LRU promotion makes even lookups a mutation, so everything but
    // `stats` goes through the write guard.
    fn entries_mut(&self, op: &'static str) -> RwLockWriteGuard<'_, Entries> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    "recovered poisoned cache store lock; entries may be stale after a panic in another thread"
                );
                poisoned.into_inner()
            }
        }
    }
}
