//! Bridge between cache mutations and coordination events.
//!
//! Outbound, every local mutation produces exactly one publish. Inbound, every
//! peer `cache:*` event evicts the referenced keys from the near cache (when
//! enabled) and then runs the registered invalidation callbacks. There is no
//! buffering or deduplication.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use meshcache_core::{
    CacheInvalidateEvent, CacheUpdateEvent, Channel, CoordinationEvent, KeyCodec,
    PatternInvalidateEvent,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{EventChannel, EventHandler, HandlerError};
use crate::near_cache::NearCache;

type InvalidationCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub struct InvalidationCoordinator {
    events: Arc<EventChannel>,
    near_cache: Option<NearCache>,
    callbacks: RwLock<Vec<InvalidationCallback>>,
}

impl InvalidationCoordinator {
    pub fn new(events: Arc<EventChannel>, near_cache: Option<NearCache>) -> Arc<Self> {
        Arc::new(Self {
            events,
            near_cache,
            callbacks: RwLock::new(Vec::new()),
        })
    }

    /// Register the inbound handler on the three cache channels.
    ///
    /// The handler holds a weak reference, so the event channel does not keep
    /// this coordinator alive.
    pub fn install(self: &Arc<Self>) {
        let handler: Arc<dyn EventHandler> = Arc::new(PeerInvalidationHandler {
            coordinator: Arc::downgrade(self),
        });
        for channel in Channel::cache_channels() {
            self.events.on(channel, Arc::clone(&handler));
        }
    }

    /// Run `f` with each namespaced key a peer wrote, deleted or pattern-invalidated.
    pub fn on_peer_invalidation<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.write().push(Arc::new(f));
    }

    /// Run `f` with the namespace-local part of each peer-invalidated key
    /// under `namespace` (`"policy"` turns `policy:quote:1` into `quote:1`).
    /// Keys in other namespaces are skipped.
    pub fn on_namespace_invalidation<F>(&self, namespace: impl Into<String>, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let codec = KeyCodec::new(namespace);
        self.on_peer_invalidation(move |key| {
            if let Some(local) = codec.strip(key) {
                f(local);
            }
        });
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    /// Announce a write of `key` (namespaced) with the TTL that was applied.
    ///
    /// Returns the number of receivers.
    pub async fn announce_update(&self, key: &str, ttl: u64) -> Result<u64> {
        let event = CacheUpdateEvent::new(self.events.service(), key, ttl);
        self.announce(CoordinationEvent::CacheUpdate(event), key).await
    }

    /// Announce deletion of `key` (namespaced).
    pub async fn announce_delete(&self, key: &str) -> Result<u64> {
        let event = CacheInvalidateEvent::new(self.events.service(), key);
        self.announce(CoordinationEvent::CacheInvalidate(event), key).await
    }

    /// Announce that `keys` matched `pattern` (both namespaced) and were removed.
    pub async fn announce_pattern(&self, pattern: &str, keys: Vec<String>) -> Result<u64> {
        let event = PatternInvalidateEvent::new(self.events.service(), pattern, keys);
        self.announce(CoordinationEvent::PatternInvalidate(event), pattern).await
    }

    async fn announce(&self, event: CoordinationEvent, target: &str) -> Result<u64> {
        let channel = event.channel();
        self.events.publish(event).await.inspect_err(|e| {
            warn!(channel = %channel, subject = target, error = %e, "Failed to broadcast cache event");
        })
    }

    fn apply_peer_event(&self, event: &CoordinationEvent) {
        let keys = event.invalidated_keys();
        debug!(
            origin = event.origin(),
            channel = %event.channel(),
            keys = keys.len(),
            "Applying peer invalidation"
        );

        if let Some(near_cache) = &self.near_cache {
            for key in &keys {
                near_cache.remove(key);
            }
        }

        let callbacks = self.callbacks.read().clone();
        for key in keys.iter().copied() {
            for callback in &callbacks {
                callback(key);
            }
        }
    }
}

impl std::fmt::Debug for InvalidationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationCoordinator")
            .field("service", &self.events.service())
            .field("near_cache", &self.near_cache.is_some())
            .field("callbacks", &self.callbacks.read().len())
            .finish()
    }
}

struct PeerInvalidationHandler {
    coordinator: Weak<InvalidationCoordinator>,
}

#[async_trait]
impl EventHandler for PeerInvalidationHandler {
    fn name(&self) -> &str {
        "peer_invalidation"
    }

    async fn handle(&self, event: &CoordinationEvent) -> std::result::Result<(), HandlerError> {
        match self.coordinator.upgrade() {
            Some(coordinator) => {
                coordinator.apply_peer_event(event);
                Ok(())
            }
            None => Err(HandlerError::execution("invalidation coordinator dropped")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcache_store::memory::MemoryServer;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn coordinator(
        server: &Arc<MemoryServer>,
        service: &str,
        near_cache: Option<NearCache>,
    ) -> Arc<InvalidationCoordinator> {
        let connections = server.client().connections();
        let events = Arc::new(EventChannel::new(
            service,
            connections.publisher,
            connections.subscriber,
        ));
        let coordinator = InvalidationCoordinator::new(events, near_cache);
        coordinator.install();
        coordinator
    }

    #[tokio::test]
    async fn test_announce_update_wire_message() {
        let server = MemoryServer::new();
        let mut tap = server.tap();
        let claims = coordinator(&server, "claims", None);

        claims.announce_update("claims:claim:CLM-001", 7200).await.unwrap();

        let message = tap.recv().await.unwrap();
        assert_eq!(message.channel, "cache:update");
        let wire: Value = serde_json::from_str(&message.payload).unwrap();
        assert_eq!(wire["service"], "claims");
        assert_eq!(wire["key"], "claims:claim:CLM-001");
        assert_eq!(wire["operation"], "set");
        assert_eq!(wire["ttl"], 7200);
    }

    #[tokio::test]
    async fn test_peer_event_evicts_near_cache_and_runs_callbacks() {
        let server = MemoryServer::new();
        let near_cache = NearCache::new(Duration::from_secs(30));
        near_cache.insert("policy:quote:1", json!(1), None);
        near_cache.insert("policy:quote:2", json!(2), None);

        let claims = coordinator(&server, "claims", Some(near_cache.clone()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        claims.on_peer_invalidation(move |key| sink.lock().push(key.to_string()));

        let event = CoordinationEvent::PatternInvalidate(PatternInvalidateEvent::new(
            "policy",
            "policy:quote:*",
            vec!["policy:quote:1".into()],
        ));
        claims.apply_peer_event(&event);

        assert!(near_cache.get("policy:quote:1").is_none());
        assert!(near_cache.get("policy:quote:2").is_some());
        assert_eq!(*seen.lock(), vec!["policy:quote:1".to_string()]);
    }

    #[tokio::test]
    async fn test_namespace_callback_sees_local_keys() {
        let server = MemoryServer::new();
        let claims = coordinator(&server, "claims", None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        claims.on_namespace_invalidation("policy", move |key| sink.lock().push(key.to_string()));

        claims.apply_peer_event(&CoordinationEvent::CacheInvalidate(CacheInvalidateEvent::new(
            "policy",
            "policy:quote:1",
        )));
        claims.apply_peer_event(&CoordinationEvent::CacheInvalidate(CacheInvalidateEvent::new(
            "billing",
            "billing:invoice:7",
        )));
        // Shares the "policy" text but not the namespace.
        claims.apply_peer_event(&CoordinationEvent::CacheUpdate(CacheUpdateEvent::new(
            "policyholder",
            "policyholder:p:1",
            60,
        )));

        assert_eq!(*seen.lock(), vec!["quote:1".to_string()]);
    }

    #[tokio::test]
    async fn test_announce_failure_is_reported() {
        let server = MemoryServer::new();
        let client = server.client();
        let connections = client.connections();
        let events = Arc::new(EventChannel::new(
            "claims",
            connections.publisher,
            connections.subscriber,
        ));
        let claims = InvalidationCoordinator::new(events, None);

        client.set_online(false);
        let err = claims.announce_delete("claims:k").await.unwrap_err();
        assert!(err.is_connection());
    }
}
