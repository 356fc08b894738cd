//! # meshcache-core
//!
//! Shared vocabulary for the meshcache coordination layer.
//!
//! This crate has no I/O. It defines:
//! - [`KeyCodec`]: `prefix:key` namespacing and transparent JSON value encoding
//! - [`Channel`]: the fixed coordination channel names other services must match
//! - [`CoordinationEvent`]: the tagged union of events and their flat JSON wire format
//! - [`ServiceRecord`]: the value stored under `service:registry:<name>`

pub mod channel;
pub mod codec;
mod error;
pub mod event;
pub mod record;
pub mod time;

pub use channel::{Channel, REGISTRY_KEY_PREFIX, registry_key, registry_pattern};
pub use codec::{KeyCodec, decode_value, encode_value};
pub use error::{CoreError, Result};
pub use event::{
    CacheInvalidateEvent, CacheUpdateEvent, CoordinationEvent, DomainEvent,
    PatternInvalidateEvent,
};
pub use record::{ServiceRecord, ServiceStatus};
