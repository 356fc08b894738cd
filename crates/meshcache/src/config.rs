use meshcache_core::Channel;
use meshcache_store::redis::RedisSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one coordinator instance (one logical service role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub service: ServiceSettings,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CoordinatorConfig {
    /// Defaults for everything except the service identity.
    pub fn for_service(name: impl Into<String>) -> Self {
        Self {
            service: ServiceSettings::new(name),
            redis: RedisConfig::default(),
            cache: CacheConfig::default(),
            registry: RegistryConfig::default(),
            events: EventsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.service.name.trim().is_empty() {
            return Err("service.name must not be empty".into());
        }
        if self.service.name.contains(':') {
            return Err("service.name must not contain ':'".into());
        }
        if self.redis.port == 0 {
            return Err("redis.port must be > 0".into());
        }
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.redis.timeout_ms == 0 {
            return Err("redis.timeout_ms must be > 0".into());
        }
        if self.registry.heartbeat_interval_secs == 0 {
            return Err("registry.heartbeat_interval_secs must be > 0".into());
        }
        if self.registry.ttl_multiplier == 0 {
            return Err("registry.ttl_multiplier must be > 0".into());
        }
        if self.cache.near_cache.enabled && self.cache.near_cache.ttl_secs == 0 {
            return Err("cache.near_cache.ttl_secs must be > 0 when the near cache is enabled".into());
        }
        if self.cache.key_prefix.as_deref() == Some("") {
            return Err("cache.key_prefix must not be empty when set".into());
        }
        if self.events.domains.iter().any(|d| d.is_empty()) {
            return Err("events.domains must not contain empty names".into());
        }
        // `<domain>:events` must read back as the same domain channel.
        if let Some(domain) = self.events.domains.iter().find(|d| {
            let channel = Channel::domain(d.as_str());
            channel.name().parse::<Channel>().ok() != Some(channel)
        }) {
            return Err(format!(
                "events.domains entry '{domain}' collides with a reserved channel (domains must not start with 'service:')"
            ));
        }
        Ok(())
    }

    /// Key namespace; the service name unless overridden.
    pub fn key_prefix(&self) -> &str {
        self.cache
            .key_prefix
            .as_deref()
            .unwrap_or(&self.service.name)
    }
}

/// Identity this process registers and stamps on every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Registry identity, default key namespace and echo-filter identity
    pub name: String,

    #[serde(default = "default_service_version")]
    pub version: String,

    /// Advertised host (default: machine hostname)
    #[serde(default = "default_service_host")]
    pub host: String,

    /// Advertised port
    #[serde(default)]
    pub port: u16,
}

impl ServiceSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_service_version(),
            host: default_service_host(),
            port: 0,
        }
    }
}

fn default_service_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_service_host() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Backing store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Prefer MESHCACHE__REDIS__PASSWORD over writing this to a file
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra connection attempts at startup
    #[serde(default = "default_redis_max_retries")]
    pub max_retries: u32,

    /// Delay between attempts; initial backoff for subscription restores
    #[serde(default = "default_redis_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_max_retries() -> u32 {
    3
}

fn default_redis_retry_delay_ms() -> u64 {
    1000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            max_retries: default_redis_max_retries(),
            retry_delay_ms: default_redis_retry_delay_ms(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn to_settings(&self) -> RedisSettings {
        RedisSettings {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            pool_size: self.pool_size,
            timeout: self.timeout(),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Key namespace (default: service name)
    #[serde(default)]
    pub key_prefix: Option<String>,

    /// TTL applied when a write passes none (or 0). 0 here stores without expiry.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default)]
    pub near_cache: NearCacheConfig,
}

fn default_ttl_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: None,
            default_ttl_secs: default_ttl_secs(),
            near_cache: NearCacheConfig::default(),
        }
    }
}

/// Per-process L1 in front of the shared store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearCacheConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Upper bound on how long an entry is served locally
    #[serde(default = "default_near_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_near_cache_ttl_secs() -> u64 {
    30
}

impl Default for NearCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: default_near_cache_ttl_secs(),
        }
    }
}

/// Service registry heartbeat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Registry key TTL as a multiple of the heartbeat interval
    #[serde(default = "default_ttl_multiplier")]
    pub ttl_multiplier: u32,
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_ttl_multiplier() -> u32 {
    3
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            ttl_multiplier: default_ttl_multiplier(),
        }
    }
}

impl RegistryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn record_ttl(&self) -> Duration {
        self.heartbeat_interval() * self.ttl_multiplier
    }
}

/// Extra channels to subscribe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Domains whose `<domain>:events` channel this service listens to
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::CoordinatorConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<CoordinatorConfig, String> {
        let mut builder = Config::builder();
        let path = PathBuf::from(path.unwrap_or("meshcache.toml"));
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }
        // Environment variable overrides, e.g., MESHCACHE__REDIS__PORT=6380
        builder = builder.add_source(
            Environment::with_prefix("MESHCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: CoordinatorConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
