//! Metrics for the coordination layer.
//!
//! Recorded through the `metrics` facade; the host process installs the
//! exporter (e.g. Prometheus) and serves it.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "meshcache_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "meshcache_cache_misses_total";

    // Event metrics
    pub const EVENTS_PUBLISHED_TOTAL: &str = "meshcache_events_published_total";
    pub const EVENTS_RECEIVED_TOTAL: &str = "meshcache_events_received_total";
    pub const EVENTS_SUPPRESSED_TOTAL: &str = "meshcache_events_suppressed_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "meshcache_events_dropped_total";

    // Registry and health
    pub const HEARTBEAT_FAILURES_TOTAL: &str = "meshcache_heartbeat_failures_total";
    pub const HEALTH_PROBE_DURATION_SECONDS: &str = "meshcache_health_probe_duration_seconds";
}

/// Record a cache hit. `tier` is "L1" (near cache) or "L2" (shared store).
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_event_published(kind: &'static str) {
    counter!(names::EVENTS_PUBLISHED_TOTAL, "channel" => kind).increment(1);
}

pub fn record_event_received(kind: &'static str) {
    counter!(names::EVENTS_RECEIVED_TOTAL, "channel" => kind).increment(1);
}

/// Record an event ignored because this service published it.
pub fn record_event_suppressed(kind: &'static str) {
    counter!(names::EVENTS_SUPPRESSED_TOTAL, "channel" => kind).increment(1);
}

/// Record an event dropped before dispatch. `reason` is "malformed" or "unknown_channel".
pub fn record_event_dropped(reason: &'static str) {
    counter!(names::EVENTS_DROPPED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_heartbeat_failure() {
    counter!(names::HEARTBEAT_FAILURES_TOTAL).increment(1);
}

pub fn record_health_probe(duration: Duration, healthy: bool) {
    histogram!(
        names::HEALTH_PROBE_DURATION_SECONDS,
        "status" => if healthy { "healthy" } else { "unhealthy" }
    )
    .record(duration.as_secs_f64());
}
