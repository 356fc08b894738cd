//! Store error types.

/// Errors returned by backing-store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store is unreachable, refused authentication, or the connection dropped.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// A single command failed (e.g. wrong type for the key).
    #[error("Operation error: {message}")]
    Operation {
        /// Description of the failed command.
        message: String,
    },

    /// The store replied with something the client could not interpret.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the unexpected reply.
        message: String,
    },
}

impl StoreError {
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    #[must_use]
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation { .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal()
            || e.is_connection_dropped()
            || e.is_io_error()
            || e.is_timeout()
            || e.kind() == redis::ErrorKind::AuthenticationFailed
        {
            StoreError::connection(e.to_string())
        } else if e.kind() == redis::ErrorKind::TypeError {
            StoreError::protocol(e.to_string())
        } else {
            StoreError::operation(e.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        StoreError::connection(e.to_string())
    }
}
