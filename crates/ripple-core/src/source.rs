//! Store-side notification channel abstraction.
//!
//! The listener only needs two things from the store: open a dedicated
//! subscription to a named channel, and poll that subscription for pending
//! payloads. Both are expressed as traits so the pipeline runs unchanged
//! against PostgreSQL or an in-memory channel.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Notification source errors.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The subscription could not be opened.
    #[error("Failed to subscribe: {0}")]
    Subscribe(String),

    /// The subscription connection is gone and must be re-established.
    #[error("Subscription lost: {0}")]
    ConnectionLost(String),

    /// A poll failed but the connection is still usable.
    #[error("Poll failed: {0}")]
    Poll(String),
}

impl SourceError {
    /// Whether the subscription has to be discarded and reopened.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, SourceError::ConnectionLost(_))
    }
}

/// A store that publishes change payloads on named channels.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Open a dedicated connection and subscribe to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, SourceError>;
}

/// An open subscription, exclusively owned by the listener.
#[async_trait]
pub trait Subscription: Send {
    /// Return the payloads pending on the channel, in emission order.
    ///
    /// Waits at most `wait` for the first payload; an empty vector means
    /// nothing arrived in that window.
    async fn poll(&mut self, wait: Duration) -> Result<Vec<String>, SourceError>;

    /// Unsubscribe and close the underlying connection.
    async fn close(self: Box<Self>) -> Result<(), SourceError>;
}
