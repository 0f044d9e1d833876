//! `LISTEN`/`NOTIFY` notification source.
//!
//! Each subscription owns a dedicated [`PgListener`] connection, separate
//! from the query pool. Connection loss is reported to the caller instead of
//! being retried here, so the listener loop owns the reconnect policy.

use crate::triggers::validate_channel;
use crate::StoreError;
use async_trait::async_trait;
use ripple_core::{NotificationSource, SourceError, Subscription};
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Query pool sizing.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// Bound on establishing or acquiring a connection.
    pub connect_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Open a query pool.
///
/// The URL is never logged; it usually carries credentials.
///
/// # Errors
///
/// Returns an error if the URL is invalid or no connection can be made.
pub async fn connect_pool(url: &str, options: &PoolOptions) -> Result<PgPool, StoreError> {
    let connect_options = PgConnectOptions::from_str(url)?;
    let pool = PgPoolOptions::new()
        .max_connections(options.max_connections)
        .acquire_timeout(options.connect_timeout)
        .connect_with(connect_options)
        .await?;
    debug!(max_connections = options.max_connections, "Database pool ready");
    Ok(pool)
}

/// Opens `LISTEN` subscriptions against a PostgreSQL database.
#[derive(Clone)]
pub struct PgNotificationSource {
    url: String,
    connect_timeout: Duration,
}

impl PgNotificationSource {
    /// Create a source for the database at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }

    async fn open(&self, channel: &str) -> Result<PgSubscription, StoreError> {
        validate_channel(channel)?;
        let connect = PgListener::connect(&self.url);
        let mut listener = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| StoreError::Timeout)??;
        listener.listen(channel).await?;
        info!(channel, "Listening for notifications");
        Ok(PgSubscription {
            listener,
            lost: None,
        })
    }
}

impl std::fmt::Debug for PgNotificationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgNotificationSource")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationSource for PgNotificationSource {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, SourceError> {
        match self.open(channel).await {
            Ok(subscription) => Ok(Box::new(subscription)),
            Err(e) => Err(SourceError::Subscribe(e.to_string())),
        }
    }
}

/// A live `LISTEN` connection.
pub struct PgSubscription {
    listener: PgListener,
    /// Set when the connection dropped after some payloads were already read.
    lost: Option<String>,
}

#[async_trait]
impl Subscription for PgSubscription {
    async fn poll(&mut self, wait: Duration) -> Result<Vec<String>, SourceError> {
        if let Some(reason) = self.lost.take() {
            return Err(SourceError::ConnectionLost(reason));
        }

        let mut payloads = Vec::new();
        match tokio::time::timeout(wait, self.listener.try_recv()).await {
            Err(_) => return Ok(payloads),
            Ok(Ok(Some(notification))) => payloads.push(notification.payload().to_owned()),
            Ok(Ok(None)) => {
                return Err(SourceError::ConnectionLost(
                    "listener connection closed".into(),
                ))
            }
            Ok(Err(e)) => return Err(classify(e)),
        }

        // Drain whatever else is already buffered without waiting again.
        loop {
            match tokio::time::timeout(Duration::ZERO, self.listener.try_recv()).await {
                Err(_) => break,
                Ok(Ok(Some(notification))) => payloads.push(notification.payload().to_owned()),
                Ok(Ok(None)) => {
                    self.lost = Some("listener connection closed".into());
                    break;
                }
                Ok(Err(e)) => {
                    self.lost = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(payloads)
    }

    async fn close(mut self: Box<Self>) -> Result<(), SourceError> {
        self.listener
            .unlisten_all()
            .await
            .map_err(|e| SourceError::Poll(e.to_string()))
    }
}

/// Map a listener error to a source error.
///
/// Transport-level failures mean the connection is gone; anything else is
/// treated as a transient poll failure.
fn classify(error: sqlx::Error) -> SourceError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => SourceError::ConnectionLost(error.to_string()),
        other => SourceError::Poll(other.to_string()),
    }
}
