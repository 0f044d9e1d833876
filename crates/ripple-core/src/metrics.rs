//! Pipeline instrumentation.
//!
//! Recorded through the `metrics` facade; the server installs the
//! Prometheus exporter.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "ripple_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "ripple_connections_active";
    pub const NOTIFICATIONS_TOTAL: &str = "ripple_notifications_total";
    pub const DELIVERIES_TOTAL: &str = "ripple_deliveries_total";
    pub const CONNECTIONS_PRUNED_TOTAL: &str = "ripple_connections_pruned_total";
    pub const LISTENER_RECONNECTS_TOTAL: &str = "ripple_listener_reconnects_total";
    pub const ERRORS_TOTAL: &str = "ripple_errors_total";
}

/// Record an accepted connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a closed connection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a notification taken off the channel.
pub fn record_notification(outcome: &'static str) {
    counter!(names::NOTIFICATIONS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a fanout pass.
pub fn record_delivery(kind: &'static str, delivered: usize, pruned: usize) {
    counter!(names::DELIVERIES_TOTAL, "kind" => kind).increment(delivered as u64);
    if pruned > 0 {
        counter!(names::CONNECTIONS_PRUNED_TOTAL, "kind" => kind).increment(pruned as u64);
    }
}

/// Record a re-established subscription.
pub fn record_reconnect() {
    counter!(names::LISTENER_RECONNECTS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}
