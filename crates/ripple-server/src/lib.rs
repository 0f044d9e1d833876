//! # Ripple Server
//!
//! HTTP/WebSocket front of the Ripple change notification service: loads
//! configuration, validates bearer tokens, and hosts the gateway that
//! registers client connections with the change pipeline.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;

pub use auth::{AuthSetupError, JwtAuthenticator};
pub use config::{Config, UserLookup};
pub use handlers::{build_router, handle_websocket, run_server, shutdown_signal, AppState};
