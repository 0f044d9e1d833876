//! Periodic liveness probes.
//!
//! A connection that vanished without a close frame (network partition,
//! suspended laptop) is only noticed when a write to it fails. The heartbeat
//! writes a `HEARTBEAT` message to every registered connection on a fixed
//! interval so such connections are pruned even when no changes flow.

use crate::broadcaster::{Broadcaster, DeliveryReport};
use crate::metrics;
use ripple_protocol::{ProtocolError, ServerMessage};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default interval between probes.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default delay before retrying after a failed pass.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Sends liveness probes to all live connections.
pub struct HeartbeatScheduler {
    broadcaster: Broadcaster,
    interval: Duration,
    retry_delay: Duration,
}

impl HeartbeatScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(broadcaster: Broadcaster, interval: Duration, retry_delay: Duration) -> Self {
        Self {
            broadcaster,
            interval,
            retry_delay,
        }
    }

    /// Probe every registered connection once, pruning those that fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the probe message cannot be encoded.
    pub async fn tick(&self) -> Result<DeliveryReport, ProtocolError> {
        self.broadcaster
            .broadcast_all(&ServerMessage::heartbeat())
            .await
    }

    /// Run until `cancel` fires.
    ///
    /// A failed pass is logged and retried after the retry delay; it never
    /// ends the loop. A pass fails only when [`tick`](Self::tick) cannot
    /// encode the probe, and the fixed `HEARTBEAT` message always encodes,
    /// so in practice every pass waits the full interval. Failed sends are
    /// not pass failures: they prune the connection and count in the report.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting heartbeat");
        let mut delay = self.interval;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.tick() => result,
            };

            match result {
                Ok(report) => {
                    debug!(
                        delivered = report.delivered,
                        pruned = report.pruned,
                        "Heartbeat sent"
                    );
                    delay = self.interval;
                }
                Err(e) => {
                    error!(error = %e, "Heartbeat failed");
                    metrics::record_error("heartbeat");
                    delay = self.retry_delay;
                }
            }
        }

        info!("Heartbeat stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::testutil::{connection, RecordingSink};
    use ripple_protocol::UserId;
    use std::sync::Arc;

    fn scheduler(registry: &Arc<ConnectionRegistry>) -> HeartbeatScheduler {
        HeartbeatScheduler::new(
            Broadcaster::new(registry.clone()),
            DEFAULT_HEARTBEAT_INTERVAL,
            DEFAULT_RETRY_DELAY,
        )
    }

    #[tokio::test]
    async fn test_dead_connection_not_probed_twice() {
        let registry = Arc::new(ConnectionRegistry::new());
        let alive = RecordingSink::new();
        let dead = RecordingSink::failing();
        let dead_conn = connection("dead", "u1", dead.clone());
        registry.register(connection("alive", "u1", alive.clone()));
        registry.register(dead_conn.clone());

        let heartbeat = scheduler(&registry);

        let first = heartbeat.tick().await.unwrap();
        assert_eq!(first, DeliveryReport { delivered: 1, pruned: 1 });
        let u1 = UserId::parse("u1").unwrap();
        assert!(!registry.contains(&u1, dead_conn.id()));

        let second = heartbeat.tick().await.unwrap();
        assert_eq!(second, DeliveryReport { delivered: 1, pruned: 0 });
        assert_eq!(dead.attempts(), 1);
        assert_eq!(alive.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_tick_with_no_connections() {
        let registry = Arc::new(ConnectionRegistry::new());
        let report = scheduler(&registry).tick().await.unwrap();
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probes_on_interval_until_cancelled() {
        let registry = Arc::new(ConnectionRegistry::new());
        let sink = RecordingSink::new();
        registry.register(connection("c1", "u1", sink.clone()));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler(&registry).run(cancel.clone()));

        tokio::time::sleep(DEFAULT_HEARTBEAT_INTERVAL / 2).await;
        assert!(sink.sent().is_empty());

        tokio::time::sleep(DEFAULT_HEARTBEAT_INTERVAL * 2).await;
        assert_eq!(sink.sent().len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sends_do_not_shorten_interval() {
        let registry = Arc::new(ConnectionRegistry::new());
        let alive = RecordingSink::new();
        registry.register(connection("alive", "u1", alive.clone()));
        registry.register(connection("dead", "u2", RecordingSink::failing()));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler(&registry).run(cancel.clone()));

        // One pass prunes "dead"; the next must wait the full interval, not
        // the retry delay.
        tokio::time::sleep(DEFAULT_HEARTBEAT_INTERVAL + DEFAULT_RETRY_DELAY * 2).await;
        assert_eq!(alive.sent().len(), 1);
        assert_eq!(registry.stats().connection_count, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
