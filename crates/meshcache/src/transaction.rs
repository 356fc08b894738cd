//! Atomic batches of cache operations.
//!
//! A batch runs as one MULTI/EXEC unit on the data connection and returns
//! per-operation results in submission order. Batches are not announced to
//! peers; callers that need peers to drop stale copies publish themselves.

use std::sync::Arc;
use std::time::Duration;

use meshcache_core::{KeyCodec, encode_value};
use meshcache_store::{BatchCommand, BatchReply, KeyValueStore};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::near_cache::NearCache;

/// One operation in a batch. Keys are unprefixed.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    /// `ttl` of `None` or `Some(0)` applies the default TTL.
    Set {
        key: String,
        value: Value,
        ttl: Option<u64>,
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

impl BatchOp {
    pub fn set<T: Serialize + ?Sized>(key: impl Into<String>, value: &T, ttl: Option<u64>) -> Result<Self> {
        Ok(BatchOp::Set {
            key: key.into(),
            value: serde_json::to_value(value)?,
            ttl,
        })
    }

    pub fn delete(key: impl Into<String>) -> Self {
        BatchOp::Delete { key: key.into() }
    }

    pub fn incr(key: impl Into<String>, by: i64) -> Self {
        BatchOp::Incr { key: key.into(), by }
    }

    pub fn decr(key: impl Into<String>, by: i64) -> Self {
        BatchOp::Decr { key: key.into(), by }
    }

    pub fn key(&self) -> &str {
        match self {
            BatchOp::Set { key, .. }
            | BatchOp::Delete { key }
            | BatchOp::Incr { key, .. }
            | BatchOp::Decr { key, .. } => key,
        }
    }
}

/// Result of one batched operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    Stored,
    /// Number of keys removed (0 or 1).
    Deleted(u64),
    /// Counter value after the increment or decrement.
    Counter(i64),
}

pub struct TransactionRunner {
    data: Arc<dyn KeyValueStore>,
    codec: KeyCodec,
    default_ttl: u64,
    near_cache: Option<NearCache>,
}

impl TransactionRunner {
    pub fn new(
        data: Arc<dyn KeyValueStore>,
        codec: KeyCodec,
        default_ttl: u64,
        near_cache: Option<NearCache>,
    ) -> Self {
        Self {
            data,
            codec,
            default_ttl,
            near_cache,
        }
    }

    /// Execute `ops` atomically and return their results in order.
    pub async fn run_batch(&self, ops: &[BatchOp]) -> Result<Vec<BatchResult>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let commands = ops.iter().map(|op| self.command(op)).collect::<Result<Vec<_>>>()?;

        let outcome = self.data.exec_atomic(&commands).await;
        // After the exec, so a read racing the batch cannot re-populate a
        // pre-batch value. Evicted on failure too: the outcome is unknown.
        if let Some(near_cache) = &self.near_cache {
            for command in &commands {
                near_cache.remove(command.key());
            }
        }

        let replies = outcome?;
        if replies.len() != ops.len() {
            return Err(CacheError::protocol(format!(
                "batch of {} operations returned {} replies",
                ops.len(),
                replies.len()
            )));
        }

        debug!(operations = ops.len(), "Batch executed");
        ops.iter()
            .zip(replies)
            .map(|(op, reply)| to_result(op, reply))
            .collect()
    }

    fn command(&self, op: &BatchOp) -> Result<BatchCommand> {
        let key = self.codec.key(op.key());
        Ok(match op {
            BatchOp::Set { value, ttl, .. } => {
                let ttl = ttl.filter(|ttl| *ttl > 0).unwrap_or(self.default_ttl);
                BatchCommand::Set {
                    key,
                    value: encode_value(value)?,
                    ttl: (ttl > 0).then(|| Duration::from_secs(ttl)),
                }
            }
            BatchOp::Delete { .. } => BatchCommand::Delete { key },
            BatchOp::Incr { by, .. } => BatchCommand::Incr { key, by: *by },
            BatchOp::Decr { by, .. } => BatchCommand::Decr { key, by: *by },
        })
    }
}

fn to_result(op: &BatchOp, reply: BatchReply) -> Result<BatchResult> {
    match (op, reply) {
        (BatchOp::Set { .. }, BatchReply::Ok) => Ok(BatchResult::Stored),
        (BatchOp::Delete { .. }, BatchReply::Integer(n)) => Ok(BatchResult::Deleted(n.max(0) as u64)),
        (BatchOp::Incr { .. } | BatchOp::Decr { .. }, BatchReply::Integer(n)) => Ok(BatchResult::Counter(n)),
        (op, reply) => Err(CacheError::protocol(format!(
            "unexpected reply {reply:?} for batched operation on {}",
            op.key()
        ))),
    }
}
