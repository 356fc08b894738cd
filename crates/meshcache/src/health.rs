//! Liveness and latency probe for a service's health endpoint.

use std::sync::Arc;
use std::time::Duration;

use meshcache_store::KeyValueStore;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Outcome of one probe, ready to serialize into a health response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

pub struct HealthProbe {
    data: Arc<dyn KeyValueStore>,
    default_timeout: Duration,
}

impl HealthProbe {
    pub fn new(data: Arc<dyn KeyValueStore>, default_timeout: Duration) -> Self {
        Self { data, default_timeout }
    }

    /// Ping the data connection. Healthy iff the reply arrives within
    /// `timeout` without error. Never fails.
    pub async fn check(&self, timeout: Duration) -> HealthReport {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.data.ping()).await;
        let elapsed = started.elapsed();

        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("ping timed out after {}ms", timeout.as_millis())),
        };

        let healthy = error.is_none();
        metrics::record_health_probe(elapsed, healthy);
        if let Some(error) = &error {
            warn!(error = %error, latency_ms = elapsed.as_millis() as u64, "Health probe failed");
        }

        HealthReport {
            status: if healthy {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            latency_ms: elapsed.as_millis() as u64,
            error,
        }
    }

    /// [`check`](Self::check) with the configured connection timeout.
    pub async fn check_default(&self) -> HealthReport {
        self.check(self.default_timeout).await
    }
}
