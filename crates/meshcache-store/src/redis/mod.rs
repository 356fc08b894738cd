//! Redis backing store.
//!
//! ## Connections
//!
//! - **Data**: `deadpool-redis` pool for key-value commands and pipelines
//! - **Publisher**: `ConnectionManager`, reconnects on its own
//! - **Subscriber**: dedicated pub/sub connection per subscription, restored
//!   with exponential backoff when it drops
//!
//! ```text
//! connect() → pool + PING (retried) → ConnectionManager → pub/sub client
//! ```

mod subscriber;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::StoreError;
use crate::traits::{
    BatchCommand, BatchReply, KeyValueStore, Publisher, StoreConnections, StoreResult,
};

pub use subscriber::RedisSubscriber;

/// Connection settings for a Redis backing store.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub pool_size: usize,
    /// Pool wait/create/recycle timeout.
    pub timeout: Duration,
    /// Extra connection attempts after the first one fails.
    pub max_retries: u32,
    /// Delay between connection attempts; also the initial reconnect backoff.
    pub retry_delay: Duration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            pool_size: 10,
            timeout: Duration::from_millis(5000),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl RedisSettings {
    /// Connection URL, with the password percent-encoded.
    pub fn url(&self) -> String {
        match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(
                "redis://:{}@{}:{}",
                urlencoding::encode(password),
                self.host,
                self.port
            ),
            None => format!("redis://{}:{}", self.host, self.port),
        }
    }

    /// URL safe for logging.
    pub fn redacted_url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

/// Open the three logical connections.
///
/// The data connection is verified with PING, retrying `max_retries` times;
/// exhausting the retries is a connection error.
pub async fn connect(settings: &RedisSettings) -> StoreResult<StoreConnections> {
    let url = settings.url();
    tracing::info!(url = %settings.redacted_url(), "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(url.as_str());
    let mut pool_config = PoolConfig::new(settings.pool_size);
    pool_config.timeouts.wait = Some(settings.timeout);
    pool_config.timeouts.create = Some(settings.timeout);
    pool_config.timeouts.recycle = Some(settings.timeout);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| StoreError::connection(format!("failed to create Redis pool: {e}")))?;

    let data = RedisData::new(pool);
    let mut attempt = 0;
    loop {
        match data.ping().await {
            Ok(()) => break,
            Err(e) if attempt < settings.max_retries => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_retries = settings.max_retries,
                    "Redis connection attempt failed, retrying"
                );
                tokio::time::sleep(settings.retry_delay).await;
            }
            Err(e) => {
                return Err(StoreError::connection(format!(
                    "Redis unreachable after {} attempts: {e}",
                    attempt + 1
                )));
            }
        }
    }

    let client = redis::Client::open(url.as_str())
        .map_err(|e| StoreError::connection(format!("failed to create Redis client: {e}")))?;

    let manager = client
        .get_connection_manager()
        .await
        .map_err(|e| StoreError::connection(format!("failed to open publisher connection: {e}")))?;

    tracing::info!("✓ Connected to Redis (data, publisher, subscriber)");

    Ok(StoreConnections::new(
        Arc::new(data),
        Arc::new(RedisPublisher::new(manager)),
        Arc::new(RedisSubscriber::new(client, settings.retry_delay)),
    ))
}

/// Data connection backed by a connection pool.
#[derive(Clone)]
pub struct RedisData {
    pool: Pool,
}

impl RedisData {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

fn to_reply(value: redis::Value) -> StoreResult<BatchReply> {
    match value {
        redis::Value::Okay | redis::Value::SimpleString(_) => Ok(BatchReply::Ok),
        redis::Value::Int(n) => Ok(BatchReply::Integer(n)),
        other => Err(StoreError::protocol(format!("unexpected batch reply: {other:?}"))),
    }
}

#[async_trait]
impl KeyValueStore for RedisData {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        match ttl {
            // SETEX rejects 0; sub-second TTLs round up to one second.
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        Ok(conn.del::<_, u64>(keys).await?)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.exists::<_, bool>(key).await?)
    }

    async fn ttl(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.ttl::<_, i64>(key).await?)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.keys::<_, Vec<String>>(pattern).await?)
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        // MGET always replies with an array, even for a single key.
        let values: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(&mut conn).await?;
        Ok(values)
    }

    async fn exec_atomic(&self, commands: &[BatchCommand]) -> StoreResult<Vec<BatchReply>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in commands {
            match command {
                BatchCommand::Set {
                    key,
                    value,
                    ttl: Some(ttl),
                } => {
                    pipe.set_ex(key, value, ttl.as_secs().max(1));
                }
                BatchCommand::Set {
                    key,
                    value,
                    ttl: None,
                } => {
                    pipe.set(key, value);
                }
                BatchCommand::Delete { key } => {
                    pipe.del(key);
                }
                BatchCommand::Incr { key, by } => {
                    pipe.incr(key, *by);
                }
                BatchCommand::Decr { key, by } => {
                    pipe.decr(key, *by);
                }
            }
        }

        let mut conn = self.conn().await?;
        let values: Vec<redis::Value> = pipe.query_async(&mut conn).await?;

        if values.len() != commands.len() {
            return Err(StoreError::protocol(format!(
                "EXEC returned {} replies for {} commands",
                values.len(),
                commands.len()
            )));
        }

        values.into_iter().map(to_reply).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::protocol(format!("unexpected PING reply: {pong}")))
        }
    }
}

/// Publisher connection.
#[derive(Clone)]
pub struct RedisPublisher {
    manager: ConnectionManager,
}

impl RedisPublisher {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, channel: &str, message: &str) -> StoreResult<u64> {
        let mut conn = self.manager.clone();
        Ok(conn.publish::<_, _, u64>(channel, message).await?)
    }
}
