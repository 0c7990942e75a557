//! Metrics collection and export for mbridge.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "mbridge_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "mbridge_connections_active";
    pub const BUS_MESSAGES_TOTAL: &str = "mbridge_bus_messages_total";
    pub const BUS_MESSAGES_DROPPED: &str = "mbridge_bus_messages_dropped_total";
    pub const PRODUCERS: &str = "mbridge_producers";
    pub const BROADCASTS_TOTAL: &str = "mbridge_broadcasts_total";
    pub const PRUNED_TOTAL: &str = "mbridge_connections_pruned_total";
    pub const FRAMES_BYTES: &str = "mbridge_push_bytes_total";
    pub const COMMANDS_TOTAL: &str = "mbridge_commands_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of push connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of push connections"
    );
    metrics::describe_counter!(
        names::BUS_MESSAGES_TOTAL,
        "Status messages applied to the store"
    );
    metrics::describe_counter!(
        names::BUS_MESSAGES_DROPPED,
        "Status messages dropped, by reason"
    );
    metrics::describe_gauge!(names::PRODUCERS, "Known producers");
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Update broadcasts sent");
    metrics::describe_counter!(
        names::PRUNED_TOTAL,
        "Push connections dropped after a failed send"
    );
    metrics::describe_counter!(names::FRAMES_BYTES, "Bytes written to push connections");
    metrics::describe_counter!(names::COMMANDS_TOTAL, "Commands dispatched, by result");

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

/// Record a new push connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a push disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an applied status message and its fan-out.
pub fn record_ingested(producers: usize, pruned: usize) {
    counter!(names::BUS_MESSAGES_TOTAL).increment(1);
    counter!(names::BROADCASTS_TOTAL).increment(1);
    gauge!(names::PRODUCERS).set(producers as f64);
    if pruned > 0 {
        counter!(names::PRUNED_TOTAL).increment(pruned as u64);
    }
}

/// Record a dropped status message.
pub fn record_dropped(reason: &'static str) {
    counter!(names::BUS_MESSAGES_DROPPED, "reason" => reason).increment(1);
}

/// Record bytes written to a push connection.
pub fn record_frame(bytes: usize) {
    counter!(names::FRAMES_BYTES).increment(bytes as u64);
}

/// Record a command dispatch.
pub fn record_command(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!(names::COMMANDS_TOTAL, "result" => result).increment(1);
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
