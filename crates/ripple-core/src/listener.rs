//! Bridge from the store's notification channel to the broadcaster.
//!
//! The listener owns a dedicated subscription and polls it on a short,
//! bounded interval. Each payload is decoded and handed to the broadcaster
//! in the order the store emitted it, so a single connection observes
//! changes in commit order.
//!
//! Faults never end the loop:
//!
//! - an undecodable payload is logged and dropped;
//! - a failed poll on a healthy connection is retried after the poll interval;
//! - a lost connection is discarded and reopened, backing off (doubling up to
//!   a cap) while the store stays unreachable.
//!
//! Only cancellation stops it.

use crate::broadcaster::Broadcaster;
use crate::metrics;
use crate::source::{NotificationSource, Subscription};
use ripple_protocol::decode_notification;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default notification channel name.
pub const DEFAULT_CHANNEL: &str = "db_changes";

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Channel to subscribe to.
    pub channel: String,
    /// Longest wait for pending notifications per poll.
    pub poll_interval: Duration,
    /// Wait after the first failed reconnect attempt.
    pub reconnect_backoff: Duration,
    /// Upper bound for the reconnect wait.
    pub max_reconnect_backoff: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            poll_interval: Duration::from_millis(100),
            reconnect_backoff: Duration::from_secs(1),
            max_reconnect_backoff: Duration::from_secs(30),
        }
    }
}

/// Polls the notification channel and forwards decoded events.
pub struct Listener {
    source: Arc<dyn NotificationSource>,
    broadcaster: Broadcaster,
    config: ListenerConfig,
    connected: Arc<AtomicBool>,
}

impl Listener {
    /// Create a listener.
    ///
    /// `connected` is kept up to date with whether a subscription is held.
    #[must_use]
    pub fn new(
        source: Arc<dyn NotificationSource>,
        broadcaster: Broadcaster,
        config: ListenerConfig,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            broadcaster,
            config,
            connected,
        }
    }

    /// Run the poll loop over an already-open subscription until cancelled.
    ///
    /// Returns the subscription held at exit, if any, so the caller can
    /// close it once the loop is known to be finished.
    pub async fn run(
        self,
        subscription: Box<dyn Subscription>,
        cancel: CancellationToken,
    ) -> Option<Box<dyn Subscription>> {
        info!(channel = %self.config.channel, "Starting notification polling");
        self.connected.store(true, Ordering::SeqCst);

        let mut subscription = Some(subscription);
        let mut backoff = self.config.reconnect_backoff;

        while !cancel.is_cancelled() {
            let Some(active) = subscription.as_mut() else {
                let attempt = tokio::select! {
                    _ = cancel.cancelled() => break,
                    attempt = self.source.subscribe(&self.config.channel) => attempt,
                };

                match attempt {
                    Ok(reopened) => {
                        info!(channel = %self.config.channel, "Subscription re-established");
                        metrics::record_reconnect();
                        self.connected.store(true, Ordering::SeqCst);
                        subscription = Some(reopened);
                        backoff = self.config.reconnect_backoff;
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            retry_in_ms = backoff.as_millis() as u64,
                            "Failed to reconnect to notification channel"
                        );
                        metrics::record_error("reconnect");
                        if sleep_or_cancel(backoff, &cancel).await {
                            break;
                        }
                        backoff = (backoff * 2).min(self.config.max_reconnect_backoff);
                    }
                }
                continue;
            };

            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = active.poll(self.config.poll_interval) => polled,
            };

            match polled {
                Ok(payloads) => {
                    for payload in payloads {
                        self.dispatch(&payload).await;
                    }
                }
                Err(e) if e.is_connection_lost() => {
                    warn!(error = %e, "Notification subscription lost, reconnecting");
                    metrics::record_error("subscription");
                    self.connected.store(false, Ordering::SeqCst);
                    // The broken connection is dropped, not closed.
                    subscription = None;
                }
                Err(e) => {
                    warn!(error = %e, "Error polling notifications");
                    metrics::record_error("poll");
                    if sleep_or_cancel(self.config.poll_interval, &cancel).await {
                        break;
                    }
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("Notification polling stopped");
        subscription
    }

    /// Decode one payload and deliver it to the owner's connections.
    async fn dispatch(&self, payload: &str) {
        let event = match decode_notification(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Invalid notification payload");
                metrics::record_notification("rejected");
                return;
            }
        };
        metrics::record_notification("decoded");

        match self.broadcaster.publish(&event).await {
            Ok(report) => debug!(
                user = %event.owner_id(),
                kind = %event.message_type(),
                delivered = report.delivered,
                pruned = report.pruned,
                "Forwarded change event"
            ),
            Err(e) => {
                error!(user = %event.owner_id(), error = %e, "Error processing notification");
                metrics::record_error("broadcast");
            }
        }
    }
}

/// Sleep for `duration`; returns `true` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
