//! Coordination channel names.
//!
//! These strings are protocol surface: every service sharing a store must use
//! them byte-for-byte.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

pub const CACHE_UPDATE: &str = "cache:update";
pub const CACHE_INVALIDATE: &str = "cache:invalidate";
pub const CACHE_INVALIDATE_PATTERN: &str = "cache:invalidate:pattern";

/// Prefix of the liveness keys written by each registered service.
pub const REGISTRY_KEY_PREFIX: &str = "service:registry:";

const SERVICE_PREFIX: &str = "service:";
const EVENTS_SUFFIX: &str = ":events";

/// Registry key for one service (a plain key, not a channel).
pub fn registry_key(service: &str) -> String {
    format!("{REGISTRY_KEY_PREFIX}{service}")
}

/// Glob matching every registry key.
pub fn registry_pattern() -> String {
    format!("{REGISTRY_KEY_PREFIX}*")
}

/// A pub/sub channel used by the coordination layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `cache:update`
    CacheUpdate,
    /// `cache:invalidate`
    CacheInvalidate,
    /// `cache:invalidate:pattern`
    PatternInvalidate,
    /// `service:<name>:events`, addressed to one service.
    Service(String),
    /// `<domain>:events`, application-level broadcasts.
    Domain(String),
}

impl Channel {
    pub fn service(name: impl Into<String>) -> Self {
        Channel::Service(name.into())
    }

    pub fn domain(domain: impl Into<String>) -> Self {
        Channel::Domain(domain.into())
    }

    /// The three fixed cache channels every coordinator subscribes to.
    pub fn cache_channels() -> [Channel; 3] {
        [
            Channel::CacheUpdate,
            Channel::CacheInvalidate,
            Channel::PatternInvalidate,
        ]
    }

    /// Wire name of the channel.
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Channel::CacheUpdate => Cow::Borrowed(CACHE_UPDATE),
            Channel::CacheInvalidate => Cow::Borrowed(CACHE_INVALIDATE),
            Channel::PatternInvalidate => Cow::Borrowed(CACHE_INVALIDATE_PATTERN),
            Channel::Service(name) => Cow::Owned(format!("{SERVICE_PREFIX}{name}{EVENTS_SUFFIX}")),
            Channel::Domain(domain) => Cow::Owned(format!("{domain}{EVENTS_SUFFIX}")),
        }
    }

    /// Label used for metrics, bounded in cardinality.
    pub fn kind(&self) -> &'static str {
        match self {
            Channel::CacheUpdate => "cache_update",
            Channel::CacheInvalidate => "cache_invalidate",
            Channel::PatternInvalidate => "cache_invalidate_pattern",
            Channel::Service(_) => "service",
            Channel::Domain(_) => "domain",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Channel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CACHE_UPDATE => return Ok(Channel::CacheUpdate),
            CACHE_INVALIDATE => return Ok(Channel::CacheInvalidate),
            CACHE_INVALIDATE_PATTERN => return Ok(Channel::PatternInvalidate),
            _ => {}
        }

        let stem = s
            .strip_suffix(EVENTS_SUFFIX)
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| CoreError::unknown_channel(s))?;

        match stem.strip_prefix(SERVICE_PREFIX) {
            Some(name) if !name.is_empty() => Ok(Channel::Service(name.to_string())),
            Some(_) => Err(CoreError::unknown_channel(s)),
            None => Ok(Channel::Domain(stem.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_channel_names() {
        assert_eq!(Channel::CacheUpdate.name(), "cache:update");
        assert_eq!(Channel::CacheInvalidate.name(), "cache:invalidate");
        assert_eq!(Channel::PatternInvalidate.name(), "cache:invalidate:pattern");
        assert_eq!(Channel::service("policy").name(), "service:policy:events");
        assert_eq!(Channel::domain("claims").name(), "claims:events");
    }

    #[test]
    fn test_parse_channels() {
        for channel in [
            Channel::CacheUpdate,
            Channel::CacheInvalidate,
            Channel::PatternInvalidate,
            Channel::service("policy-service"),
            Channel::domain("billing"),
        ] {
            let parsed: Channel = channel.name().parse().unwrap();
            assert_eq!(parsed, channel);
        }
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!("cache:other".parse::<Channel>().is_err());
        assert!(":events".parse::<Channel>().is_err());
        assert!("service::events".parse::<Channel>().is_err());
    }

    #[test]
    fn test_registry_keys() {
        assert_eq!(registry_key("claims"), "service:registry:claims");
        assert_eq!(registry_pattern(), "service:registry:*");
    }
}
