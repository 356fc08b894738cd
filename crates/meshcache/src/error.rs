//! Error taxonomy of the coordination layer.
//!
//! Read paths never return these: they log and fall back to a safe default.
//! Writes, pattern invalidation, batches and registration propagate them.

use meshcache_core::CoreError;
use meshcache_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Store unreachable or authentication failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A single command failed.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// Unexpected reply or malformed payload.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Registry write failed.
    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    pub fn registration(msg: impl Into<String>) -> Self {
        CacheError::Registration(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        CacheError::Protocol(msg.into())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, CacheError::Connection(_))
    }
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Connection { message } => CacheError::Connection(message),
            StoreError::Operation { message } => CacheError::Operation(message),
            StoreError::Protocol { message } => CacheError::Protocol(message),
        }
    }
}

impl From<CoreError> for CacheError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Json(e) => CacheError::Serialization(e),
            other => CacheError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
