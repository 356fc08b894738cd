//! Redis subscriber connection.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::PubSub;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::traits::{MessageStream, StoreMessage, StoreResult, Subscriber};

const MAX_BACKOFF: Duration = Duration::from_secs(300);
const BUFFER_SIZE: usize = 1024;

/// Opens a dedicated pub/sub connection per subscription.
///
/// When the connection drops, a background task reconnects with exponential
/// backoff (starting at `retry_delay`, capped at 5 minutes) and re-subscribes
/// the same channels. Messages published while disconnected are lost. The
/// task stops once the returned stream is dropped.
#[derive(Clone)]
pub struct RedisSubscriber {
    client: redis::Client,
    retry_delay: Duration,
}

impl RedisSubscriber {
    pub fn new(client: redis::Client, retry_delay: Duration) -> Self {
        Self {
            client,
            retry_delay,
        }
    }
}

async fn open(client: &redis::Client, channels: &[String]) -> redis::RedisResult<PubSub> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channels).await?;
    Ok(pubsub)
}

async fn pump(
    client: redis::Client,
    channels: Vec<String>,
    initial: PubSub,
    sender: mpsc::Sender<StoreMessage>,
    retry_delay: Duration,
) {
    let mut pubsub = Some(initial);
    let mut backoff = retry_delay;

    loop {
        if let Some(mut active) = pubsub.take() {
            let mut stream = active.on_message();
            loop {
                tokio::select! {
                    _ = sender.closed() => {
                        debug!(?channels, "Subscription dropped, closing pub/sub connection");
                        return;
                    }
                    msg = stream.next() => match msg {
                        Some(msg) => {
                            let payload = match msg.get_payload::<String>() {
                                Ok(payload) => payload,
                                Err(e) => {
                                    warn!(error = %e, channel = %msg.get_channel_name(), "Failed to read pub/sub payload");
                                    continue;
                                }
                            };
                            let message = StoreMessage {
                                channel: msg.get_channel_name().to_string(),
                                payload,
                            };
                            if sender.send(message).await.is_err() {
                                return;
                            }
                        }
                        None => break,
                    }
                }
            }
            warn!(?channels, "Redis pub/sub stream ended, reconnecting");
        }

        tokio::select! {
            _ = sender.closed() => return,
            _ = sleep(backoff) => {}
        }

        match open(&client, &channels).await {
            Ok(restored) => {
                info!(?channels, "Redis pub/sub subscription restored");
                backoff = retry_delay;
                pubsub = Some(restored);
            }
            Err(e) => {
                error!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Redis pub/sub reconnect failed"
                );
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn subscribe(&self, channels: &[String]) -> StoreResult<MessageStream> {
        let pubsub = open(&self.client, channels)
            .await
            .map_err(|e| StoreError::connection(format!("failed to subscribe: {e}")))?;

        info!(?channels, "Subscribed to Redis channels");

        let (sender, receiver) = mpsc::channel(BUFFER_SIZE);
        tokio::spawn(pump(
            self.client.clone(),
            channels.to_vec(),
            pubsub,
            sender,
            self.retry_delay,
        ));

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }
}
