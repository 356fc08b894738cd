//! # meshcache
//!
//! Cache coordination shared by independently deployed services.
//!
//! Each service process owns one [`ServiceCoordinator`], which gives it:
//! - a namespaced cache ([`CacheStore`]) whose every mutation is broadcast
//!   to peers
//! - reactions to peer mutations, with echo suppression
//!   ([`InvalidationCoordinator`], [`EventChannel`])
//! - a heartbeat-based service registry ([`ServiceRegistry`])
//! - atomic batches ([`TransactionRunner`]) and a health probe ([`HealthProbe`])
//!
//! An optional per-process near cache ([`NearCache`]) sits in front of the
//! shared store and is evicted by peer events.
//!
//! ## Example
//!
//! ```ignore
//! use meshcache::{CoordinatorConfig, ServiceCoordinator};
//! use serde_json::json;
//!
//! let config = CoordinatorConfig::for_service("claims");
//! meshcache::observability::init_from_config(&config.logging);
//!
//! let coordinator = ServiceCoordinator::connect(config).await?;
//! coordinator.cache().set("claim:CLM-001", &json!({"amount": 500}), Some(7200)).await?;
//!
//! coordinator.invalidation().on_peer_invalidation(|key| {
//!     tracing::info!(key, "peer changed a key");
//! });
//! coordinator.invalidation().on_namespace_invalidation("policy", |quote| {
//!     tracing::info!(quote, "policy quote changed");
//! });
//!
//! coordinator.disconnect().await?;
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod health;
pub mod invalidation;
pub mod metrics;
pub mod near_cache;
pub mod observability;
pub mod registry;
pub mod transaction;

pub use cache::CacheStore;
pub use config::CoordinatorConfig;
pub use coordinator::ServiceCoordinator;
pub use error::{CacheError, Result};
pub use events::{EventChannel, EventHandler, FnHandler, HandlerError};
pub use health::{HealthProbe, HealthReport, HealthStatus};
pub use invalidation::InvalidationCoordinator;
pub use near_cache::NearCache;
pub use registry::ServiceRegistry;
pub use transaction::{BatchOp, BatchResult, TransactionRunner};

pub use meshcache_core::{
    CacheInvalidateEvent, CacheUpdateEvent, Channel, CoordinationEvent, DomainEvent, KeyCodec,
    PatternInvalidateEvent, ServiceRecord, ServiceStatus,
};
pub use meshcache_store::{StoreConnections, StoreError};
