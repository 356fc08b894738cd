//! Publish/subscribe over the coordination channels.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                 ┌──────────────────────┐
//! │  claims              │                 │  policy              │
//! │                      │                 │                      │
//! │  EventChannel        │                 │  EventChannel        │
//! │    publish() ────────┼──► publisher ──►│    listener task     │
//! │                      │     (store)     │      │ decode        │
//! │                      │                 │      │ echo filter   │
//! │                      │                 │      ▼ handlers      │
//! └──────────────────────┘                 └──────────────────────┘
//! ```
//!
//! Publishing and subscribing use separate store connections. Each received
//! message is decoded into a [`CoordinationEvent`]; events published by this
//! same service are dropped, malformed ones are logged and dropped, and the
//! rest go to the handlers registered for the channel, in receipt order.

mod handler;

pub use handler::{EventHandler, FnHandler, HandlerError};

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use meshcache_core::{Channel, CoordinationEvent, DomainEvent};
use meshcache_store::{Publisher, StoreMessage, Subscriber};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metrics;

/// Event publishing and dispatch for one service identity.
pub struct EventChannel {
    service: String,
    publisher: Arc<dyn Publisher>,
    subscriber: Arc<dyn Subscriber>,
    handlers: RwLock<HashMap<Channel, Vec<Arc<dyn EventHandler>>>>,
}

impl EventChannel {
    pub fn new(
        service: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        subscriber: Arc<dyn Subscriber>,
    ) -> Self {
        Self {
            service: service.into(),
            publisher,
            subscriber,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Identity stamped on outgoing events and used for echo suppression.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Register a handler for events arriving on `channel`.
    pub fn on(&self, channel: Channel, handler: Arc<dyn EventHandler>) {
        debug!(channel = %channel, handler = handler.name(), "Registered event handler");
        self.handlers.write().entry(channel).or_default().push(handler);
    }

    /// Register a closure for events arriving on `channel`.
    pub fn on_fn<F>(&self, channel: Channel, name: impl Into<String>, f: F)
    where
        F: Fn(&CoordinationEvent) + Send + Sync + 'static,
    {
        self.on(channel, Arc::new(FnHandler::new(name, f)));
    }

    /// Stamp `event` with this service's identity and the current time, then publish it.
    ///
    /// Returns the number of receivers reported by the store.
    pub async fn publish(&self, mut event: CoordinationEvent) -> Result<u64> {
        event.stamp(&self.service);
        let channel = event.channel();
        let message = event.encode()?;

        let receivers = self.publisher.publish(&channel.name(), &message).await?;
        metrics::record_event_published(channel.kind());
        debug!(channel = %channel, receivers, "Published coordination event");
        Ok(receivers)
    }

    /// Publish an application event on `<domain>:events`.
    pub async fn publish_domain(&self, domain: &str, payload: Map<String, Value>) -> Result<u64> {
        let event = DomainEvent::new(Channel::domain(domain), self.service.clone(), payload);
        self.publish(CoordinationEvent::Domain(event)).await
    }

    /// Publish an event addressed to one service on `service:<target>:events`.
    pub async fn publish_to_service(&self, target: &str, payload: Map<String, Value>) -> Result<u64> {
        let event = DomainEvent::new(Channel::service(target), self.service.clone(), payload);
        self.publish(CoordinationEvent::Domain(event)).await
    }

    /// Subscribe to `channels` and dispatch incoming events until `shutdown` fires.
    ///
    /// Returns once the subscription is active. Subscriptions are issued once;
    /// restoring them after a dropped connection is the store client's job.
    pub async fn listen(
        self: &Arc<Self>,
        channels: &[Channel],
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let names: Vec<String> = channels.iter().map(|c| c.name().into_owned()).collect();
        let mut stream = self.subscriber.subscribe(&names).await?;

        info!(service = %self.service, channels = ?names, "Listening for coordination events");

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    message = stream.next() => match message {
                        Some(message) => this.dispatch(message).await,
                        None => {
                            warn!(service = %this.service, "Coordination event stream ended");
                            break;
                        }
                    }
                }
            }
            debug!(service = %this.service, "Event listener stopped");
        }))
    }

    /// Decode, echo-filter and hand one message to its channel's handlers.
    pub(crate) async fn dispatch(&self, message: StoreMessage) {
        let channel: Channel = match message.channel.parse() {
            Ok(channel) => channel,
            Err(e) => {
                warn!(error = %e, "Dropping event from unknown channel");
                metrics::record_event_dropped("unknown_channel");
                return;
            }
        };

        let event = match CoordinationEvent::decode(&channel, &message.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    error = %e,
                    channel = %channel,
                    payload = %message.payload,
                    "Dropping malformed coordination event"
                );
                metrics::record_event_dropped("malformed");
                return;
            }
        };

        if event.origin() == self.service {
            metrics::record_event_suppressed(channel.kind());
            return;
        }

        metrics::record_event_received(channel.kind());

        let handlers = self.handlers.read().get(&channel).cloned().unwrap_or_default();
        if handlers.is_empty() {
            debug!(channel = %channel, origin = %event.origin(), "No handler for event, dropping");
            return;
        }

        for handler in handlers {
            if let Err(e) = handler.handle(&event).await {
                warn!(
                    handler = handler.name(),
                    channel = %channel,
                    error = %e,
                    "Event handler failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("service", &self.service)
            .field("channels_with_handlers", &self.handlers.read().len())
            .finish()
    }
}
