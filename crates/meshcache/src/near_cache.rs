//! Per-process L1 cache in front of the shared store.
//!
//! ```text
//! get → L1 (DashMap) → L2 (store) → None
//!          <1µs          ~1ms
//! ```
//!
//! Entries are dropped when a peer announces a write, delete or pattern
//! invalidation for the same namespaced key.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A cached entry with TTL support.
///
/// The value is wrapped in `Arc` so hits are cheap clones.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub value: Arc<Value>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self {
            value: Arc::new(value),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Shared handle to one process's near cache, keyed by namespaced key.
#[derive(Clone, Debug)]
pub struct NearCache {
    entries: Arc<DashMap<String, CachedEntry>>,
    max_ttl: Duration,
}

impl NearCache {
    pub fn new(max_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Some(Arc::clone(&entry.value));
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    /// Insert for `ttl` capped at the configured maximum. `None` means the
    /// store entry does not expire.
    pub fn insert(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let ttl = ttl.map_or(self.max_ttl, |ttl| ttl.min(self.max_ttl));
        if ttl.is_zero() {
            return;
        }
        self.entries.insert(key.to_string(), CachedEntry::new(value, ttl));
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
