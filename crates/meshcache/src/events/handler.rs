//! Event handler traits.
//!
//! Handlers are registered per channel on an [`EventChannel`](super::EventChannel)
//! and run in receipt order, one at a time, on the listener task. They
//! should be quick; errors are logged and never reach the publisher.

use async_trait::async_trait;
use meshcache_core::CoordinationEvent;

/// Error type for handler execution.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler execution failed: {0}")]
    Execution(String),
}

impl HandlerError {
    pub fn execution(msg: impl Into<String>) -> Self {
        HandlerError::Execution(msg.into())
    }
}

/// Reaction to a coordination event received from a peer.
///
/// # Example
///
/// ```ignore
/// struct QuoteCacheDrop { quotes: Arc<QuoteCache> }
///
/// #[async_trait]
/// impl EventHandler for QuoteCacheDrop {
///     fn name(&self) -> &str { "quote_cache_drop" }
///
///     async fn handle(&self, event: &CoordinationEvent) -> Result<(), HandlerError> {
///         for key in event.invalidated_keys() {
///             self.quotes.forget(key);
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Unique name for this handler (for logging).
    fn name(&self) -> &str;

    async fn handle(&self, event: &CoordinationEvent) -> Result<(), HandlerError>;
}

/// Adapter turning a plain closure into an [`EventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&CoordinationEvent) + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&CoordinationEvent) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &CoordinationEvent) -> Result<(), HandlerError> {
        (self.f)(event);
        Ok(())
    }
}
