//! Metrics export for Ripple.
//!
//! The pipeline records through the `metrics` facade (see
//! [`ripple_core::metrics`]); this module describes those metrics and
//! exports them in Prometheus format.

use metrics_exporter_prometheus::PrometheusBuilder;
use ripple_core::metrics::{names, record_connection, record_disconnection};
use std::net::SocketAddr;
use tracing::info;

/// Describe the metrics.
///
/// Descriptions are kept by the recorder installed at the time of the call,
/// so this runs after the exporter is installed.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of accepted connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Notifications taken off the channel, by decode outcome"
    );
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Messages accepted by client connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_PRUNED_TOTAL,
        "Connections removed after a failed send"
    );
    metrics::describe_counter!(
        names::LISTENER_RECONNECTS_TOTAL,
        "Re-established notification subscriptions"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server and describe the metrics.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    init_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
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
