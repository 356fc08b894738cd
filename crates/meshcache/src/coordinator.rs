//! One coordinator instance per service identity.
//!
//! [`ServiceCoordinator::connect`] opens the three store connections,
//! registers the service, starts its heartbeat and subscribes to
//! `service:<name>:events`, the three `cache:*` channels and any configured
//! `<domain>:events` channels. [`disconnect`](ServiceCoordinator::disconnect)
//! undoes all of it.

use std::sync::Arc;

use meshcache_core::{Channel, KeyCodec};
use meshcache_store::StoreConnections;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::config::CoordinatorConfig;
use crate::error::{CacheError, Result};
use crate::events::EventChannel;
use crate::health::HealthProbe;
use crate::invalidation::InvalidationCoordinator;
use crate::near_cache::NearCache;
use crate::registry::ServiceRegistry;
use crate::transaction::TransactionRunner;

pub struct ServiceCoordinator {
    config: CoordinatorConfig,
    events: Arc<EventChannel>,
    invalidation: Arc<InvalidationCoordinator>,
    cache: CacheStore,
    transactions: TransactionRunner,
    registry: ServiceRegistry,
    health: HealthProbe,
    near_cache: Option<NearCache>,
    shutdown: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceCoordinator {
    /// Connect to Redis as configured and start coordinating.
    pub async fn connect(config: CoordinatorConfig) -> Result<Self> {
        config.validate().map_err(CacheError::Config)?;
        let connections = meshcache_store::redis::connect(&config.redis.to_settings()).await?;
        Self::connect_with(config, connections).await
    }

    /// Start coordinating over already-open store connections.
    pub async fn connect_with(config: CoordinatorConfig, connections: StoreConnections) -> Result<Self> {
        config.validate().map_err(CacheError::Config)?;

        let service = config.service.name.clone();
        let codec = KeyCodec::new(config.key_prefix());
        let default_ttl = config.cache.default_ttl_secs;
        let near_cache = config
            .cache
            .near_cache
            .enabled
            .then(|| NearCache::new(std::time::Duration::from_secs(config.cache.near_cache.ttl_secs)));

        let events = Arc::new(EventChannel::new(
            service.clone(),
            Arc::clone(&connections.publisher),
            Arc::clone(&connections.subscriber),
        ));
        let invalidation = InvalidationCoordinator::new(Arc::clone(&events), near_cache.clone());
        invalidation.install();

        let cache = CacheStore::new(
            Arc::clone(&connections.data),
            codec.clone(),
            default_ttl,
            near_cache.clone(),
            Arc::clone(&invalidation),
        );
        let transactions = TransactionRunner::new(
            Arc::clone(&connections.data),
            codec,
            default_ttl,
            near_cache.clone(),
        );
        let health = HealthProbe::new(Arc::clone(&connections.data), config.redis.timeout());
        let registry = ServiceRegistry::new(
            Arc::clone(&connections.data),
            config.service.clone(),
            &config.registry,
        );

        registry.register().await?;

        let mut channels = vec![Channel::service(service.clone())];
        channels.extend(Channel::cache_channels());
        channels.extend(config.events.domains.iter().map(Channel::domain));

        let shutdown = CancellationToken::new();
        let listener = match events.listen(&channels, shutdown.child_token()).await {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(unregister_error) = registry.unregister().await {
                    warn!(error = %unregister_error, "Failed to roll back registration");
                }
                return Err(e);
            }
        };

        info!(
            service = %service,
            prefix = %cache.codec().prefix(),
            near_cache = near_cache.is_some(),
            channels = channels.len(),
            "Service coordinator connected"
        );

        Ok(Self {
            config,
            events,
            invalidation,
            cache,
            transactions,
            registry,
            health,
            near_cache,
            shutdown,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Stop listening, stop the heartbeat and delete the registry record.
    ///
    /// Safe to call more than once.
    pub async fn disconnect(&self) -> Result<()> {
        self.shutdown.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.await;
        }
        self.registry.unregister().await?;
        info!(service = %self.config.service.name, "Service coordinator disconnected");
        Ok(())
    }

    pub fn service_name(&self) -> &str {
        &self.config.service.name
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    pub fn invalidation(&self) -> &Arc<InvalidationCoordinator> {
        &self.invalidation
    }

    pub fn transactions(&self) -> &TransactionRunner {
        &self.transactions
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn health(&self) -> &HealthProbe {
        &self.health
    }

    pub fn near_cache(&self) -> Option<&NearCache> {
        self.near_cache.as_ref()
    }
}

impl Drop for ServiceCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ServiceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCoordinator")
            .field("service", &self.config.service.name)
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
