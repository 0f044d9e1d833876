//! # Ripple Store
//!
//! PostgreSQL side of Ripple:
//!
//! - [`PgNotificationSource`]: a `LISTEN`-based notification source
//! - [`install_triggers`] / [`uninstall_triggers`]: the row triggers that emit change payloads
//! - [`PgUserLookup`]: username to user id resolution for token subjects

pub mod postgres;
pub mod triggers;
pub mod users;

pub use postgres::{connect_pool, PgNotificationSource, PgSubscription, PoolOptions};
pub use triggers::{install_triggers, uninstall_triggers, validate_channel};
pub use users::PgUserLookup;

use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query or connection failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Channel name is not a plain SQL identifier.
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// The database did not answer in time.
    #[error("Timed out connecting to the database")]
    Timeout,
}
