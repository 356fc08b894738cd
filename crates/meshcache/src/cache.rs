//! Namespaced read/write cache over the data connection.
//!
//! Reads fail soft: a store error is logged and reported as a miss (or the
//! documented default). Writes and pattern invalidation propagate errors,
//! including a failed broadcast after the data change was applied. Every
//! successful mutation is announced to peers through the
//! [`InvalidationCoordinator`].

use std::sync::Arc;
use std::time::Duration;

use meshcache_core::{KeyCodec, decode_value, encode_value};
use meshcache_store::KeyValueStore;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::invalidation::InvalidationCoordinator;
use crate::metrics;
use crate::near_cache::NearCache;

pub struct CacheStore {
    data: Arc<dyn KeyValueStore>,
    codec: KeyCodec,
    /// Seconds; 0 stores without expiry.
    default_ttl: u64,
    near_cache: Option<NearCache>,
    invalidation: Arc<InvalidationCoordinator>,
}

impl CacheStore {
    pub fn new(
        data: Arc<dyn KeyValueStore>,
        codec: KeyCodec,
        default_ttl: u64,
        near_cache: Option<NearCache>,
        invalidation: Arc<InvalidationCoordinator>,
    ) -> Self {
        Self {
            data,
            codec,
            default_ttl,
            near_cache,
            invalidation,
        }
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    /// TTL in seconds a write with `ttl` ends up with (0 = none).
    fn effective_ttl(&self, ttl: Option<u64>) -> u64 {
        ttl.filter(|ttl| *ttl > 0).unwrap_or(self.default_ttl)
    }

    /// Store `value` under `key` and announce the write on `cache:update`.
    ///
    /// `ttl` of `None` or `Some(0)` applies the configured default. A publish
    /// failure is returned even though the value is already stored.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<u64>) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let namespaced = self.codec.key(key);
        let raw = encode_value(value)?;
        let ttl = self.effective_ttl(ttl);
        let expiry = (ttl > 0).then(|| Duration::from_secs(ttl));

        self.data.set(&namespaced, &raw, expiry).await?;
        debug!(key = %namespaced, ttl, "Cache set");

        if let Some(near_cache) = &self.near_cache {
            near_cache.insert(&namespaced, decode_value(&raw), expiry);
        }

        self.invalidation.announce_update(&namespaced, ttl).await?;
        Ok(())
    }

    /// Value under `key`, or `None` on a miss or a store error.
    ///
    /// Text that is not JSON comes back as [`Value::String`].
    pub async fn get(&self, key: &str) -> Option<Value> {
        let namespaced = self.codec.key(key);

        if let Some(value) = self.near_cache.as_ref().and_then(|l1| l1.get(&namespaced)) {
            metrics::record_cache_hit("L1");
            return Some(Value::clone(&value));
        }

        let raw = match self.data.get(&namespaced).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::record_cache_miss();
                return None;
            }
            Err(e) => {
                warn!(key = %namespaced, error = %e, "Cache get failed");
                metrics::record_cache_miss();
                return None;
            }
        };

        metrics::record_cache_hit("L2");
        let value = decode_value(&raw);
        self.promote(&namespaced, &value).await;
        Some(value)
    }

    /// Typed read; a value that does not deserialize into `T` is a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Values for `keys` in order. Reads the store directly; on error every
    /// slot is `None`.
    pub async fn mget(&self, keys: &[&str]) -> Vec<Option<Value>> {
        if keys.is_empty() {
            return Vec::new();
        }

        let namespaced = self.codec.keys(keys.iter().copied());
        match self.data.mget(&namespaced).await {
            Ok(values) => values
                .into_iter()
                .map(|raw| raw.as_deref().map(decode_value))
                .collect(),
            Err(e) => {
                warn!(keys = keys.len(), error = %e, "Cache mget failed");
                vec![None; keys.len()]
            }
        }
    }

    /// Delete `key`, returning how many keys were removed.
    ///
    /// Announces on `cache:invalidate` only when the key existed. A store
    /// error is logged and reported as 0. A failed announce is logged and the
    /// removed count still returned.
    pub async fn delete(&self, key: &str) -> u64 {
        let namespaced = self.codec.key(key);
        if let Some(near_cache) = &self.near_cache {
            near_cache.remove(&namespaced);
        }

        let removed = match self.data.del(std::slice::from_ref(&namespaced)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = %namespaced, error = %e, "Cache delete failed");
                return 0;
            }
        };

        if removed > 0 {
            // Logged by the coordinator.
            let _ = self.invalidation.announce_delete(&namespaced).await;
        }
        debug!(key = %namespaced, removed, "Cache delete");
        removed
    }

    /// Delete every key matching the glob `pattern` within this namespace.
    ///
    /// Announces the matched keys on `cache:invalidate:pattern`. Zero matches
    /// return 0 without a broadcast.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let namespaced = self.codec.pattern(pattern);
        let keys = self.data.keys(&namespaced).await?;
        if keys.is_empty() {
            debug!(pattern = %namespaced, "Pattern matched no keys");
            return Ok(0);
        }

        let removed = self.data.del(&keys).await?;
        if let Some(near_cache) = &self.near_cache {
            for key in &keys {
                near_cache.remove(key);
            }
        }

        debug!(pattern = %namespaced, matched = keys.len(), removed, "Pattern invalidated");
        self.invalidation.announce_pattern(&namespaced, keys).await?;
        Ok(removed)
    }

    /// Whether `key` exists; `false` on a store error.
    pub async fn exists(&self, key: &str) -> bool {
        let namespaced = self.codec.key(key);
        self.data.exists(&namespaced).await.unwrap_or_else(|e| {
            warn!(key = %namespaced, error = %e, "Cache exists failed");
            false
        })
    }

    /// Seconds remaining, `-1` without expiry (or on a store error), `-2` when missing.
    pub async fn ttl(&self, key: &str) -> i64 {
        let namespaced = self.codec.key(key);
        self.data.ttl(&namespaced).await.unwrap_or_else(|e| {
            warn!(key = %namespaced, error = %e, "Cache ttl failed");
            -1
        })
    }

    /// Copy an L2 hit into the near cache for at most its remaining lifetime.
    async fn promote(&self, namespaced: &str, value: &Value) {
        let Some(near_cache) = &self.near_cache else {
            return;
        };

        let remaining = match self.data.ttl(namespaced).await {
            Ok(-1) => None,
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs as u64)),
            Ok(_) => return,
            Err(e) => {
                debug!(key = %namespaced, error = %e, "Skipping near cache promotion");
                return;
            }
        };
        near_cache.insert(namespaced, value.clone(), remaining);
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("prefix", &self.codec.prefix())
            .field("default_ttl", &self.default_ttl)
            .field("near_cache", &self.near_cache.is_some())
            .finish()
    }
}
