//! Coordination events and their wire format.
//!
//! Every event travels as one flat JSON object:
//!
//! ```text
//! {"service": "...", "key"|"pattern": "...", "operation": "...",
//!  "ttl"?: 3600, "keys"?: [...], "count"?: 2, "timestamp": 1700000000000}
//! ```
//!
//! The channel an event arrives on decides which variant it decodes into;
//! `operation` is informational for non-Rust peers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::Channel;
use crate::error::{CoreError, Result};
use crate::time::now_millis;

const OP_SET: &str = "set";
const OP_DELETE: &str = "delete";
const OP_INVALIDATE_PATTERN: &str = "invalidate_pattern";

/// A key was written. Published on `cache:update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheUpdateEvent {
    pub service: String,
    /// Namespaced key.
    pub key: String,
    /// TTL applied to the write, in seconds.
    pub ttl: u64,
    pub timestamp: i64,
}

impl CacheUpdateEvent {
    pub fn new(service: impl Into<String>, key: impl Into<String>, ttl: u64) -> Self {
        Self {
            service: service.into(),
            key: key.into(),
            ttl,
            timestamp: now_millis(),
        }
    }
}

/// A key was deleted. Published on `cache:invalidate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInvalidateEvent {
    pub service: String,
    /// Namespaced key.
    pub key: String,
    pub timestamp: i64,
}

impl CacheInvalidateEvent {
    pub fn new(service: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            key: key.into(),
            timestamp: now_millis(),
        }
    }
}

/// Keys matching a glob were deleted. Published on `cache:invalidate:pattern`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternInvalidateEvent {
    pub service: String,
    /// Namespaced glob.
    pub pattern: String,
    /// Namespaced keys that matched and were removed.
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub count: u64,
    pub timestamp: i64,
}

impl PatternInvalidateEvent {
    pub fn new(service: impl Into<String>, pattern: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            service: service.into(),
            pattern: pattern.into(),
            count: keys.len() as u64,
            keys,
            timestamp: now_millis(),
        }
    }
}

/// Application event on `service:<name>:events` or `<domain>:events`.
///
/// The payload is flattened into the message next to `service` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(skip)]
    pub channel: Option<Channel>,
    pub service: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl DomainEvent {
    pub fn new(channel: Channel, service: impl Into<String>, mut payload: Map<String, Value>) -> Self {
        // Envelope fields win over payload fields of the same name.
        payload.remove("service");
        payload.remove("timestamp");
        Self {
            channel: Some(channel),
            service: service.into(),
            timestamp: now_millis(),
            payload,
        }
    }
}

/// Every event the coordination layer sends or receives.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinationEvent {
    CacheUpdate(CacheUpdateEvent),
    CacheInvalidate(CacheInvalidateEvent),
    PatternInvalidate(PatternInvalidateEvent),
    Domain(DomainEvent),
}

impl CoordinationEvent {
    /// Channel this event is published on.
    ///
    /// A domain event decoded without channel context maps to `<service>:events`.
    pub fn channel(&self) -> Channel {
        match self {
            CoordinationEvent::CacheUpdate(_) => Channel::CacheUpdate,
            CoordinationEvent::CacheInvalidate(_) => Channel::CacheInvalidate,
            CoordinationEvent::PatternInvalidate(_) => Channel::PatternInvalidate,
            CoordinationEvent::Domain(event) => event
                .channel
                .clone()
                .unwrap_or_else(|| Channel::Domain(event.service.clone())),
        }
    }

    /// Identity of the service that published the event.
    pub fn origin(&self) -> &str {
        match self {
            CoordinationEvent::CacheUpdate(e) => &e.service,
            CoordinationEvent::CacheInvalidate(e) => &e.service,
            CoordinationEvent::PatternInvalidate(e) => &e.service,
            CoordinationEvent::Domain(e) => &e.service,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            CoordinationEvent::CacheUpdate(e) => e.timestamp,
            CoordinationEvent::CacheInvalidate(e) => e.timestamp,
            CoordinationEvent::PatternInvalidate(e) => e.timestamp,
            CoordinationEvent::Domain(e) => e.timestamp,
        }
    }

    /// Overwrite origin and timestamp with the sender's identity and the current time.
    pub fn stamp(&mut self, service: &str) {
        let now = now_millis();
        let (origin, timestamp) = match self {
            CoordinationEvent::CacheUpdate(e) => (&mut e.service, &mut e.timestamp),
            CoordinationEvent::CacheInvalidate(e) => (&mut e.service, &mut e.timestamp),
            CoordinationEvent::PatternInvalidate(e) => (&mut e.service, &mut e.timestamp),
            CoordinationEvent::Domain(e) => (&mut e.service, &mut e.timestamp),
        };
        *origin = service.to_string();
        *timestamp = now;
    }

    /// Namespaced keys whose cached copies this event makes stale.
    pub fn invalidated_keys(&self) -> Vec<&str> {
        match self {
            CoordinationEvent::CacheUpdate(e) => vec![e.key.as_str()],
            CoordinationEvent::CacheInvalidate(e) => vec![e.key.as_str()],
            CoordinationEvent::PatternInvalidate(e) => e.keys.iter().map(String::as_str).collect(),
            CoordinationEvent::Domain(_) => Vec::new(),
        }
    }

    /// Serialize to the flat JSON message.
    pub fn encode(&self) -> Result<String> {
        let (mut value, operation) = match self {
            CoordinationEvent::CacheUpdate(e) => (serde_json::to_value(e)?, Some(OP_SET)),
            CoordinationEvent::CacheInvalidate(e) => (serde_json::to_value(e)?, Some(OP_DELETE)),
            CoordinationEvent::PatternInvalidate(e) => {
                (serde_json::to_value(e)?, Some(OP_INVALIDATE_PATTERN))
            }
            CoordinationEvent::Domain(e) => (serde_json::to_value(e)?, None),
        };

        if let (Some(operation), Value::Object(map)) = (operation, &mut value) {
            map.insert("operation".to_string(), Value::String(operation.to_string()));
        }

        Ok(serde_json::to_string(&value)?)
    }

    /// Parse a message received on `channel`.
    pub fn decode(channel: &Channel, payload: &str) -> Result<Self> {
        let malformed = |e: serde_json::Error| CoreError::malformed_event(channel.name(), e.to_string());

        let event = match channel {
            Channel::CacheUpdate => {
                CoordinationEvent::CacheUpdate(serde_json::from_str(payload).map_err(malformed)?)
            }
            Channel::CacheInvalidate => {
                CoordinationEvent::CacheInvalidate(serde_json::from_str(payload).map_err(malformed)?)
            }
            Channel::PatternInvalidate => CoordinationEvent::PatternInvalidate(
                serde_json::from_str(payload).map_err(malformed)?,
            ),
            Channel::Service(_) | Channel::Domain(_) => {
                let mut event: DomainEvent = serde_json::from_str(payload).map_err(malformed)?;
                event.channel = Some(channel.clone());
                CoordinationEvent::Domain(event)
            }
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_wire_shape() {
        let event = CoordinationEvent::CacheUpdate(CacheUpdateEvent {
            service: "claims".into(),
            key: "claims:claim:CLM-001".into(),
            ttl: 7200,
            timestamp: 1_700_000_000_000,
        });

        let wire: Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
        assert_eq!(
            wire,
            json!({
                "service": "claims",
                "key": "claims:claim:CLM-001",
                "operation": "set",
                "ttl": 7200,
                "timestamp": 1_700_000_000_000i64
            })
        );
    }

    #[test]
    fn test_pattern_event_carries_keys_and_count() {
        let event = PatternInvalidateEvent::new(
            "policy",
            "policy:quote:*",
            vec!["policy:quote:1".into(), "policy:quote:2".into()],
        );
        assert_eq!(event.count, 2);

        let wrapped = CoordinationEvent::PatternInvalidate(event);
        let decoded =
            CoordinationEvent::decode(&Channel::PatternInvalidate, &wrapped.encode().unwrap()).unwrap();
        assert_eq!(decoded, wrapped);
        assert_eq!(decoded.invalidated_keys(), vec!["policy:quote:1", "policy:quote:2"]);
    }

    #[test]
    fn test_decode_from_foreign_publisher() {
        // Messages written by other implementations carry the operation field.
        let payload = r#"{"service":"billing","key":"billing:inv:9","operation":"delete","timestamp":5}"#;
        let event = CoordinationEvent::decode(&Channel::CacheInvalidate, payload).unwrap();
        assert_eq!(event.origin(), "billing");
        assert_eq!(event.timestamp(), 5);
        assert_eq!(event.invalidated_keys(), vec!["billing:inv:9"]);
    }

    #[test]
    fn test_domain_payload_is_flattened() {
        let mut payload = Map::new();
        payload.insert("policyId".into(), json!("P-7"));
        payload.insert("service".into(), json!("spoofed"));

        let event = CoordinationEvent::Domain(DomainEvent::new(Channel::domain("policy"), "policy", payload));
        let encoded = event.encode().unwrap();
        let wire: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(wire["service"], "policy");
        assert_eq!(wire["policyId"], "P-7");
        assert!(wire.get("operation").is_none());

        let decoded = CoordinationEvent::decode(&Channel::domain("policy"), &encoded).unwrap();
        assert_eq!(decoded.channel(), Channel::domain("policy"));
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_stamp_overrides_origin() {
        let mut event = CoordinationEvent::CacheInvalidate(CacheInvalidateEvent {
            service: "someone-else".into(),
            key: "k".into(),
            timestamp: 0,
        });
        event.stamp("claims");
        assert_eq!(event.origin(), "claims");
        assert!(event.timestamp() > 0);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(CoordinationEvent::decode(&Channel::CacheUpdate, "not json").is_err());
        assert!(CoordinationEvent::decode(&Channel::CacheUpdate, r#"{"service":"a"}"#).is_err());
        assert!(CoordinationEvent::decode(&Channel::service("a"), "[1,2]").is_err());
    }
}
