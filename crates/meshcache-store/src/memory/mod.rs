//! In-memory backing store.
//!
//! A [`MemoryServer`] plays the role of the shared store; each process (or
//! test "service") talks to it through its own [`MemoryClient`]. Taking a
//! client offline makes its commands fail with connection errors and makes
//! its subscriptions lose every message published until it is back online,
//! which mirrors a real pub/sub reconnect gap.
//!
//! Expiry uses tokio's clock, so paused-time tests can advance past TTLs.

mod glob;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::StoreError;
use crate::traits::{
    BatchCommand, BatchReply, KeyValueStore, MessageStream, Publisher, StoreConnections,
    StoreMessage, StoreResult, Subscriber,
};

const TAP_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct Subscription {
    channels: HashSet<String>,
    online: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<StoreMessage>,
}

/// Shared in-memory store with pub/sub.
#[derive(Debug)]
pub struct MemoryServer {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    subscriptions: Mutex<Vec<Subscription>>,
    tap: broadcast::Sender<StoreMessage>,
}

impl MemoryServer {
    pub fn new() -> Arc<Self> {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            tap,
        })
    }

    /// A new client connected to this server.
    pub fn client(self: &Arc<Self>) -> MemoryClient {
        MemoryClient {
            server: Arc::clone(self),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Receive every message published on any channel (for test spies).
    pub fn tap(&self) -> broadcast::Receiver<StoreMessage> {
        self.tap.subscribe()
    }

    /// Deliver to every online subscriber of `message.channel`.
    ///
    /// Connectivity is checked at publish time: an offline subscriber never
    /// sees the message, even after it comes back.
    fn deliver(&self, message: StoreMessage) -> u64 {
        let mut subscriptions = self.subscriptions.lock();
        subscriptions.retain(|subscription| !subscription.sender.is_closed());

        let mut receivers = 0;
        for subscription in subscriptions.iter() {
            if subscription.online.load(Ordering::SeqCst)
                && subscription.channels.contains(&message.channel)
                && subscription.sender.send(message.clone()).is_ok()
            {
                receivers += 1;
            }
        }
        drop(subscriptions);

        let _ = self.tap.send(message);
        receivers
    }

    /// Number of unexpired keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One client of a [`MemoryServer`].
///
/// Clones share the same online flag, so all three logical connections of a
/// process go down and come back together.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    server: Arc<MemoryServer>,
    online: Arc<AtomicBool>,
}

impl MemoryClient {
    /// Data, publisher and subscriber connections backed by this client.
    pub fn connections(&self) -> StoreConnections {
        StoreConnections::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        tracing::debug!(online, "memory client connectivity changed");
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn server(&self) -> &Arc<MemoryServer> {
        &self.server
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::connection("memory client is offline"))
        }
    }
}

fn live<'a>(
    entries: &'a mut HashMap<String, MemoryEntry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut MemoryEntry> {
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn apply_set(entries: &mut HashMap<String, MemoryEntry>, key: &str, value: &str, ttl: Option<Duration>, now: Instant) {
    entries.insert(
        key.to_string(),
        MemoryEntry {
            value: value.to_string(),
            expires_at: ttl.map(|ttl| now + ttl),
        },
    );
}

fn apply_del(entries: &mut HashMap<String, MemoryEntry>, keys: &[String], now: Instant) -> u64 {
    keys.iter()
        .filter(|key| entries.remove(key.as_str()).is_some_and(|entry| !entry.is_expired(now)))
        .count() as u64
}

fn apply_incr(entries: &mut HashMap<String, MemoryEntry>, key: &str, by: i64, now: Instant) -> StoreResult<i64> {
    let not_an_integer = || StoreError::operation("ERR value is not an integer or out of range");

    match live(entries, key, now) {
        Some(entry) => {
            let current: i64 = entry.value.parse().map_err(|_| not_an_integer())?;
            let next = current.checked_add(by).ok_or_else(not_an_integer)?;
            entry.value = next.to_string();
            Ok(next)
        }
        None => {
            apply_set(entries, key, &by.to_string(), None, now);
            Ok(by)
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryClient {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_online()?;
        let mut entries = self.server.entries.lock();
        Ok(live(&mut entries, key, Instant::now()).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.ensure_online()?;
        let mut entries = self.server.entries.lock();
        apply_set(&mut entries, key, value, ttl, Instant::now());
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.ensure_online()?;
        let mut entries = self.server.entries.lock();
        Ok(apply_del(&mut entries, keys, Instant::now()))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.ensure_online()?;
        let mut entries = self.server.entries.lock();
        Ok(live(&mut entries, key, Instant::now()).is_some())
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.server.entries.lock();
        let ttl = match live(&mut entries, key, now) {
            None => -2,
            Some(MemoryEntry { expires_at: None, .. }) => -1,
            Some(MemoryEntry {
                expires_at: Some(at),
                ..
            }) => {
                // Round up so a live key never reports 0.
                let remaining = at.saturating_duration_since(now).as_millis() as i64;
                (remaining + 999) / 1000
            }
        };
        Ok(ttl)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.ensure_online()?;
        let matcher = glob::compile(pattern)?;
        let now = Instant::now();
        let mut entries = self.server.entries.lock();
        entries.retain(|_, entry| !entry.is_expired(now));

        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| matcher.is_match(key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.server.entries.lock();
        Ok(keys
            .iter()
            .map(|key| live(&mut entries, key, now).map(|entry| entry.value.clone()))
            .collect())
    }

    async fn exec_atomic(&self, commands: &[BatchCommand]) -> StoreResult<Vec<BatchReply>> {
        self.ensure_online()?;
        let now = Instant::now();
        let mut entries = self.server.entries.lock();

        // Like EXEC: a failing command does not stop the others from running.
        let mut replies = Vec::with_capacity(commands.len());
        let mut first_error = None;
        for command in commands {
            let reply = match command {
                BatchCommand::Set { key, value, ttl } => {
                    apply_set(&mut entries, key, value, *ttl, now);
                    Ok(BatchReply::Ok)
                }
                BatchCommand::Delete { key } => {
                    Ok(BatchReply::Integer(apply_del(&mut entries, std::slice::from_ref(key), now) as i64))
                }
                BatchCommand::Incr { key, by } => apply_incr(&mut entries, key, *by, now).map(BatchReply::Integer),
                BatchCommand::Decr { key, by } => {
                    apply_incr(&mut entries, key, by.saturating_neg(), now).map(BatchReply::Integer)
                }
            };

            match reply {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(replies),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        self.ensure_online()
    }
}

#[async_trait]
impl Publisher for MemoryClient {
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<u64> {
        self.ensure_online()?;
        Ok(self.server.deliver(StoreMessage {
            channel: channel.to_string(),
            payload: message.to_string(),
        }))
    }
}

#[async_trait]
impl Subscriber for MemoryClient {
    async fn subscribe(&self, channels: &[String]) -> StoreResult<MessageStream> {
        self.ensure_online()?;

        let (sender, receiver) = mpsc::unbounded_channel();
        self.server.subscriptions.lock().push(Subscription {
            channels: channels.iter().cloned().collect(),
            online: Arc::clone(&self.online),
            sender,
        });

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }
}
