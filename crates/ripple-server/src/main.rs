//! # Ripple Server
//!
//! Pushes database changes to the owning user's WebSocket connections.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ripple
//!
//! # Run with a specific config file
//! RIPPLE_CONFIG=/path/to/ripple.toml ripple
//!
//! # Run with environment variables
//! RIPPLE_PORT=8080 DATABASE_URL=postgres://... SECRET_KEY=... ripple
//! ```

use anyhow::{Context, Result};
use ripple_core::{Bridge, Broadcaster, ConnectionRegistry};
use ripple_server::{handlers, Config, JwtAuthenticator, UserLookup};
use ripple_store::{connect_pool, install_triggers, PgNotificationSource, PgUserLookup, PoolOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;

    tracing::info!("Starting Ripple server on {}:{}", config.host, config.port);

    let connect_timeout = Duration::from_millis(config.database.connect_timeout_ms);
    let pool = connect_pool(
        &config.database.url,
        &PoolOptions {
            max_connections: config.database.max_connections,
            connect_timeout,
        },
    )
    .await
    .context("Failed to connect to the database")?;

    if config.database.install_triggers {
        install_triggers(&pool, &config.listener.channel)
            .await
            .context("Failed to install change triggers")?;
    }

    let mut authenticator = JwtAuthenticator::new(&config.auth.secret, &config.auth.algorithm)?;
    if config.auth.user_lookup == UserLookup::Database {
        authenticator = authenticator.with_user_lookup(PgUserLookup::new(pool.clone()));
    }

    // The change pipeline must be running before clients are accepted
    let source = PgNotificationSource::new(config.database.url.clone(), connect_timeout);
    let registry = Arc::new(ConnectionRegistry::new());
    let bridge = Arc::new(Bridge::new(
        Arc::new(source),
        Broadcaster::new(registry),
        config.bridge(),
    ));
    bridge
        .start()
        .await
        .context("Failed to start the change bridge")?;

    let state = Arc::new(handlers::AppState::new(
        config,
        bridge.clone(),
        Arc::new(authenticator),
    ));
    let served = handlers::run_server(state, handlers::shutdown_signal()).await;

    bridge.stop().await;
    pool.close().await;

    served
}
