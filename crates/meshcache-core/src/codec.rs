//! Key namespacing and value encoding.
//!
//! Every cache key is stored as `prefix:key`. Values are stored as JSON text;
//! on read, text that does not parse as JSON is returned as a plain string so
//! values written by non-JSON clients remain readable.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Deterministic `prefix:key` namespacing for one keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    prefix: String,
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespaced form of a caller-supplied key.
    pub fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Namespaced form of a key glob (`*`, `?`, `[..]` are passed through).
    pub fn pattern(&self, pattern: &str) -> String {
        self.key(pattern)
    }

    pub fn keys<'a, I>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter().map(|k| self.key(k)).collect()
    }

    /// Strip this codec's prefix from a namespaced key.
    ///
    /// Returns `None` when the key belongs to another namespace.
    pub fn strip<'a>(&self, namespaced: &'a str) -> Option<&'a str> {
        namespaced
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }
}

/// Encode a value for storage.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a stored value, falling back to the raw text when it is not JSON.
pub fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
