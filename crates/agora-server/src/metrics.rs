//! Metrics collection and export for Agora.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use agora_core::HubCounts;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "agora_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "agora_connections_active";
    pub const ENVELOPES_TOTAL: &str = "agora_envelopes_total";
    pub const ENVELOPES_BYTES: &str = "agora_envelopes_bytes";
    pub const CHANNELS_ACTIVE: &str = "agora_channels_active";
    pub const ROOMS_ACTIVE: &str = "agora_rooms_active";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "agora_subscriptions_active";
    pub const MESSAGES_ROUTED_TOTAL: &str = "agora_messages_routed_total";
    pub const FRAMES_DROPPED_TOTAL: &str = "agora_frames_dropped_total";
    pub const VALIDATION_FAILURES_TOTAL: &str = "agora_validation_failures_total";
    pub const PERSISTENCE_FAILURES_TOTAL: &str = "agora_persistence_failures_total";
    pub const HISTORY_AVAILABLE: &str = "agora_history_available";
    pub const DISPATCH_SECONDS: &str = "agora_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "agora_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::ENVELOPES_TOTAL, "Total number of envelopes processed");
    metrics::describe_counter!(names::ENVELOPES_BYTES, "Total bytes of envelopes processed");
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of channels");
    metrics::describe_gauge!(names::ROOMS_ACTIVE, "Current number of rooms");
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Current number of channel subscriptions"
    );
    metrics::describe_counter!(
        names::MESSAGES_ROUTED_TOTAL,
        "Total envelopes fanned out to subscribers"
    );
    metrics::describe_counter!(
        names::FRAMES_DROPPED_TOTAL,
        "Outbound frames dropped by queue overflow or disconnect races"
    );
    metrics::describe_counter!(
        names::VALIDATION_FAILURES_TOTAL,
        "Inbound frames rejected by validation"
    );
    metrics::describe_counter!(
        names::PERSISTENCE_FAILURES_TOTAL,
        "History store operations that failed"
    );
    metrics::describe_gauge!(
        names::HISTORY_AVAILABLE,
        "Whether the history backend is currently reachable (1 or 0)"
    );
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an envelope passing through the transport.
pub fn record_envelope(bytes: usize, direction: &str) {
    counter!(names::ENVELOPES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::ENVELOPES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Record inbound frame processing latency.
pub fn record_dispatch_latency(seconds: f64) {
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Push the hub's own counts into the exported metrics.
pub fn sync_hub_gauges(counts: &HubCounts) {
    gauge!(names::CHANNELS_ACTIVE).set(counts.channels as f64);
    gauge!(names::ROOMS_ACTIVE).set(counts.rooms as f64);
    gauge!(names::SUBSCRIPTIONS_ACTIVE).set(counts.subscriptions as f64);
    gauge!(names::HISTORY_AVAILABLE).set(if counts.history_available { 1.0 } else { 0.0 });
    counter!(names::MESSAGES_ROUTED_TOTAL).absolute(counts.counters.messages_routed);
    counter!(names::FRAMES_DROPPED_TOTAL).absolute(counts.counters.frames_dropped);
    counter!(names::VALIDATION_FAILURES_TOTAL).absolute(counts.counters.validation_failures);
    counter!(names::PERSISTENCE_FAILURES_TOTAL).absolute(counts.counters.persistence_failures);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
