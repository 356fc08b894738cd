//! Backing-store traits.
//!
//! The coordination layer talks to its store through three logical
//! connections, each behind its own trait: a data connection for key-value
//! commands, a publisher connection, and a subscriber connection. A
//! subscribed connection cannot issue data commands in the same protocol
//! session, so the roles are never merged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// A message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMessage {
    pub channel: String,
    pub payload: String,
}

/// Stream of messages for an active subscription. Dropping it unsubscribes.
pub type MessageStream = BoxStream<'static, StoreMessage>;

/// One command inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchCommand {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    Incr {
        key: String,
        by: i64,
    },
    Decr {
        key: String,
        by: i64,
    },
}

impl BatchCommand {
    pub fn key(&self) -> &str {
        match self {
            BatchCommand::Set { key, .. }
            | BatchCommand::Delete { key }
            | BatchCommand::Incr { key, .. }
            | BatchCommand::Decr { key, .. } => key,
        }
    }
}

/// Reply to one batched command, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchReply {
    /// Status reply (`SET`).
    Ok,
    /// Integer reply (`DEL` count, `INCRBY`/`DECRBY` new value).
    Integer(i64),
}

/// Key-value commands on the data connection.
///
/// `ttl` uses store semantics: seconds remaining, `-1` when the key has no
/// expiry, `-2` when it does not exist.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// `SET`, or `SETEX` when `ttl` is given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    async fn ttl(&self, key: &str) -> StoreResult<i64>;

    /// Server-side scan for keys matching a glob.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Values for `keys` in order; `None` for misses.
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// Execute commands as one atomic unit (MULTI/EXEC).
    async fn exec_atomic(&self, commands: &[BatchCommand]) -> StoreResult<Vec<BatchReply>>;

    /// Round-trip liveness command.
    async fn ping(&self) -> StoreResult<()>;
}

/// Publishing on the publisher connection.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish a message, returning the number of receivers.
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<u64>;
}

/// Subscriptions on the subscriber connection.
///
/// `subscribe` returns once the subscription is active. If the connection
/// drops afterwards, the implementation restores it on its own; messages
/// published during the gap are lost.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, channels: &[String]) -> StoreResult<MessageStream>;
}

/// The three logical connections one coordinator owns.
#[derive(Clone)]
pub struct StoreConnections {
    pub data: Arc<dyn KeyValueStore>,
    pub publisher: Arc<dyn Publisher>,
    pub subscriber: Arc<dyn Subscriber>,
}

impl StoreConnections {
    pub fn new(
        data: Arc<dyn KeyValueStore>,
        publisher: Arc<dyn Publisher>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Self {
        Self {
            data,
            publisher,
            subscriber,
        }
    }
}

impl std::fmt::Debug for StoreConnections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConnections").finish_non_exhaustive()
    }
}
