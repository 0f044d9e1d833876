//! Connection handlers for Ripple server.
//!
//! This module handles the connection lifecycle: authenticate the token in
//! the path, register the connection, then read and discard inbound traffic
//! until the client leaves or the pipeline prunes the connection.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use ripple_core::{Authenticator, Bridge, Connection, ConnectionRegistry, LifecycleState};
use ripple_protocol::close_code;
use ripple_transport::{drain_until_close, split_socket, ConnectionId, MessageSink};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The change pipeline.
    pub bridge: Arc<Bridge>,
    /// Token validation.
    pub authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, bridge: Arc<Bridge>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            config,
            bridge,
            authenticator,
        }
    }

    /// The registry the gateway registers connections in.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.bridge.broadcaster().registry()
    }
}

/// Build the HTTP router: `{websocket_path}/:token` and `/health`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let ws_route = format!(
        "{}/:token",
        state.config.transport.websocket_path.trim_end_matches('/')
    );

    Router::new()
        .route(&ws_route, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let config = &state.config;

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Ripple server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/{{token}}",
        addr,
        config.transport.websocket_path.trim_end_matches('/')
    );

    axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Ripple server stopped accepting connections");
    Ok(())
}

/// Completes on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry().stats();
    let bridge = state.bridge.state();
    let listener_connected = state.bridge.is_listener_connected();
    let status = if bridge == LifecycleState::Running && listener_connected {
        "ok"
    } else {
        "degraded"
    };

    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "bridge": bridge.as_str(),
        "listener_connected": listener_connected,
        "users": stats.user_count,
        "connections": stats.connection_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(token): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state, token))
}

/// Handle a WebSocket connection.
///
/// A connection that fails authentication is closed with 1008 and never
/// registered. One that arrives while the server is at capacity is closed
/// with 1013. Otherwise it stays registered until the client closes, the
/// transport fails, or a failed send prunes it.
pub async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, token: String) {
    let (sink, receiver) = split_socket(socket, state.config.send_timeout());

    let user_id = match state.authenticator.resolve_user(&token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            warn!(error = %e, "WebSocket authentication failed");
            ripple_core::metrics::record_error("auth");
            if let Err(e) = sink
                .close(close_code::POLICY_VIOLATION, "authentication failed")
                .await
            {
                debug!(error = %e, "Failed to send close frame");
            }
            return;
        }
    };

    let registry = state.registry().clone();
    if registry.stats().connection_count >= state.config.limits.max_connections {
        warn!(
            user = %user_id,
            max_connections = state.config.limits.max_connections,
            "Connection limit reached"
        );
        ripple_core::metrics::record_error("capacity");
        if let Err(e) = sink
            .close(close_code::TRY_AGAIN_LATER, "server at capacity")
            .await
        {
            debug!(error = %e, "Failed to send close frame");
        }
        return;
    }

    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection = Connection::new(ConnectionId::generate(), user_id, sink);
    registry.register(connection.clone());
    info!(
        user = %connection.user_id(),
        connection = %connection.id(),
        "WebSocket connected"
    );

    let outcome = tokio::select! {
        result = drain_until_close(receiver) => Some(result),
        _ = connection.closed() => None,
    };

    match outcome {
        Some(Ok(())) => {
            debug!(connection = %connection.id(), "Client closed the connection");
        }
        Some(Err(e)) => {
            warn!(connection = %connection.id(), error = %e, "WebSocket error");
            ripple_core::metrics::record_error("websocket");
            if let Err(e) = connection
                .close(close_code::INTERNAL_ERROR, "receive error")
                .await
            {
                debug!(error = %e, "Failed to send close frame");
            }
        }
        None => {
            debug!(connection = %connection.id(), "Connection pruned by the pipeline");
        }
    }

    // Cleanup: the connection must never outlive its handler in the registry
    registry.unregister(connection.user_id(), connection.id());

    info!(
        user = %connection.user_id(),
        connection = %connection.id(),
        "WebSocket disconnected"
    );
}
