//! Service registry records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Active,
}

/// Liveness record stored under `service:registry:<name>`.
///
/// A record is live exactly as long as its key has not expired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_heartbeat: OffsetDateTime,
    pub status: ServiceStatus,
    pub version: String,
}

impl ServiceRecord {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        version: impl Into<String>,
    ) -> Self {
        let now = crate::time::now_utc();
        Self {
            name: name.into(),
            host: host.into(),
            port,
            registered_at: now,
            last_heartbeat: now,
            status: ServiceStatus::Active,
            version: version.into(),
        }
    }

    /// Refresh `last_heartbeat`, keeping the original registration time.
    pub fn touch(&mut self) {
        self.last_heartbeat = crate::time::now_utc();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
