//! # meshcache-store
//!
//! Backing-store abstraction for the meshcache coordination layer.
//!
//! The layer consumes a small operation set: `GET/SET/SETEX/DEL/EXISTS/TTL/
//! KEYS/MGET`, `PUBLISH/SUBSCRIBE`, an atomic pipeline and `PING`. This crate
//! defines that surface as traits and ships two implementations:
//!
//! - [`redis`]: production backend (`deadpool-redis` + `redis`)
//! - [`memory`]: in-process fake with controllable connectivity, for tests
//!
//! ## Example
//!
//! ```ignore
//! use meshcache_store::{memory::MemoryServer, KeyValueStore};
//!
//! let server = MemoryServer::new();
//! let connections = server.client().connections();
//! connections.data.set("k", "v", None).await?;
//! ```

mod error;
pub mod memory;
pub mod redis;
mod traits;

pub use error::StoreError;
pub use traits::{
    BatchCommand, BatchReply, KeyValueStore, MessageStream, Publisher, StoreConnections,
    StoreMessage, StoreResult, Subscriber,
};
