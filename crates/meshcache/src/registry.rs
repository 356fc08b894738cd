//! Heartbeat-based service registry.
//!
//! ```text
//! UNREGISTERED ──register()──► ACTIVE ──unregister()──► UNREGISTERED
//!                               │  ▲
//!                               └──┘ heartbeat: rewrite record, refresh TTL
//! ```
//!
//! Each service writes a [`ServiceRecord`] under `service:registry:<name>`
//! with a TTL of `heartbeat_interval × ttl_multiplier`. A peer is live exactly
//! as long as its key exists; a crashed process simply stops refreshing and
//! its record expires. Nothing ever marks a peer dead explicitly.

use std::sync::Arc;
use std::time::Duration;

use meshcache_core::{ServiceRecord, registry_key, registry_pattern};
use meshcache_store::KeyValueStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{RegistryConfig, ServiceSettings};
use crate::error::{CacheError, Result};
use crate::metrics;

enum RegistrationState {
    Unregistered,
    Active {
        token: CancellationToken,
        handle: JoinHandle<()>,
    },
}

pub struct ServiceRegistry {
    data: Arc<dyn KeyValueStore>,
    service: ServiceSettings,
    heartbeat_interval: Duration,
    record_ttl: Duration,
    shutdown: CancellationToken,
    state: Mutex<RegistrationState>,
}

impl ServiceRegistry {
    pub fn new(data: Arc<dyn KeyValueStore>, service: ServiceSettings, config: &RegistryConfig) -> Self {
        Self {
            data,
            service,
            heartbeat_interval: config.heartbeat_interval(),
            record_ttl: config.record_ttl(),
            shutdown: CancellationToken::new(),
            state: Mutex::new(RegistrationState::Unregistered),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service.name
    }

    pub fn record_ttl(&self) -> Duration {
        self.record_ttl
    }

    /// Write this service's record and start the heartbeat.
    ///
    /// Registering again replaces the record (new `registeredAt`) and restarts
    /// the heartbeat. A record of another process under the same name is
    /// overwritten.
    pub async fn register(&self) -> Result<ServiceRecord> {
        let mut state = self.state.lock().await;
        if let RegistrationState::Active { token, handle } =
            std::mem::replace(&mut *state, RegistrationState::Unregistered)
        {
            token.cancel();
            let _ = handle.await;
        }

        let record = ServiceRecord::new(
            self.service.name.clone(),
            self.service.host.clone(),
            self.service.port,
            self.service.version.clone(),
        );
        let key = registry_key(&self.service.name);
        write_record(self.data.as_ref(), &key, &record, self.record_ttl)
            .await
            .map_err(|e| CacheError::registration(format!("failed to register {}: {e}", self.service.name)))?;

        let token = self.shutdown.child_token();
        let handle = tokio::spawn(heartbeat(
            Arc::clone(&self.data),
            key,
            record.clone(),
            self.heartbeat_interval,
            self.record_ttl,
            token.clone(),
        ));
        *state = RegistrationState::Active { token, handle };

        info!(
            service = %self.service.name,
            host = %record.host,
            port = record.port,
            ttl_secs = self.record_ttl.as_secs(),
            "Service registered"
        );
        Ok(record)
    }

    /// Stop the heartbeat and delete this service's record.
    ///
    /// Does nothing when not registered.
    pub async fn unregister(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let RegistrationState::Active { token, handle } =
            std::mem::replace(&mut *state, RegistrationState::Unregistered)
        else {
            return Ok(());
        };

        token.cancel();
        let _ = handle.await;

        self.data
            .del(&[registry_key(&self.service.name)])
            .await
            .map_err(|e| CacheError::registration(format!("failed to unregister {}: {e}", self.service.name)))?;
        info!(service = %self.service.name, "Service unregistered");
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        matches!(*self.state.lock().await, RegistrationState::Active { .. })
    }

    /// Records of every currently live service, sorted by name.
    ///
    /// A best-effort snapshot: keys that expire between the scan and the read
    /// are omitted, as are records that fail to parse. Empty on store errors.
    pub async fn list_live(&self) -> Vec<ServiceRecord> {
        let keys = match self.data.keys(&registry_pattern()).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Registry scan failed");
                return Vec::new();
            }
        };
        if keys.is_empty() {
            return Vec::new();
        }

        let values = match self.data.mget(&keys).await {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "Registry read failed");
                return Vec::new();
            }
        };

        let mut records: Vec<ServiceRecord> = keys
            .iter()
            .zip(values)
            .filter_map(|(key, raw)| parse_record(key, raw.as_deref()?))
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Record of the live service `name`, if any.
    pub async fn lookup(&self, name: &str) -> Option<ServiceRecord> {
        let key = registry_key(name);
        match self.data.get(&key).await {
            Ok(raw) => parse_record(&key, raw.as_deref()?),
            Err(e) => {
                warn!(key = %key, error = %e, "Registry lookup failed");
                None
            }
        }
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        // Stops the heartbeat; the record is left to expire.
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("service", &self.service.name)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("record_ttl", &self.record_ttl)
            .finish()
    }
}

async fn write_record(
    data: &dyn KeyValueStore,
    key: &str,
    record: &ServiceRecord,
    ttl: Duration,
) -> Result<()> {
    let raw = record.to_json()?;
    data.set(key, &raw, Some(ttl)).await?;
    Ok(())
}

fn parse_record(key: &str, raw: &str) -> Option<ServiceRecord> {
    match ServiceRecord::from_json(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(key, error = %e, "Ignoring unparseable registry record");
            None
        }
    }
}

/// Rewrite the record every `interval` until cancelled.
///
/// A failed write is logged and retried on the next tick; if the store stays
/// unreachable for a whole TTL the record lapses.
async fn heartbeat(
    data: Arc<dyn KeyValueStore>,
    key: String,
    mut record: ServiceRecord,
    interval: Duration,
    ttl: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                record.touch();
                match write_record(data.as_ref(), &key, &record, ttl).await {
                    Ok(()) => debug!(key = %key, "Heartbeat"),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Heartbeat write failed");
                        metrics::record_heartbeat_failure();
                    }
                }
            }
        }
    }
    debug!(key = %key, "Heartbeat stopped");
}
