//! Server configuration.
//!
//! Configuration can be loaded from:
//! - The file named by `RIPPLE_CONFIG`
//! - A TOML file in one of the default locations
//! - Environment variables (`RIPPLE_*`, `DATABASE_URL`, `POSTGRES_*`, `SECRET_KEY`)
//!   for the defaults of fields the file leaves out

use anyhow::{Context, Result};
use ripple_core::{BridgeConfig, ListenerConfig};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Notification listener configuration.
    #[serde(default)]
    pub listener: ListenerSettings,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Token validation.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path prefix of the WebSocket endpoint; the token follows it.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of live connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Time allowed for a single send, in milliseconds.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

/// Notification listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerSettings {
    /// Channel the change triggers publish on.
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Poll interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// First reconnect wait in milliseconds.
    #[serde(default = "default_reconnect_backoff")]
    pub reconnect_backoff_ms: u64,

    /// Longest reconnect wait in milliseconds.
    #[serde(default = "default_max_reconnect_backoff")]
    pub max_reconnect_backoff_ms: u64,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Retry delay after a failed pass, in milliseconds.
    #[serde(default = "default_heartbeat_retry")]
    pub retry_delay_ms: u64,
}

/// Database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Query pool size.
    #[serde(default = "default_db_max_connections")]
    pub max_connections: u32,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Install the change triggers at startup.
    #[serde(default)]
    pub install_triggers: bool,
}

/// How a token subject becomes a user id.
///
/// Defaults to [`UserLookup::Database`]: tokens carry a username in `sub`,
/// so every accepted connection costs one query against `users`. A
/// deployment without that table must set `user_lookup = "subject"`, or
/// every client is rejected with an authentication backend error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserLookup {
    /// The subject is the user id.
    Subject,
    /// The subject is a username, resolved through the `users` table.
    Database,
}

/// Token validation configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared signing secret.
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Signing algorithm name, e.g. `HS256`.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Subject resolution.
    #[serde(default = "default_user_lookup")]
    pub user_lookup: UserLookup,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("RIPPLE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("RIPPLE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_send_timeout() -> u64 {
    5_000
}

fn default_channel() -> String {
    ripple_core::listener::DEFAULT_CHANNEL.to_string()
}

fn default_poll_interval() -> u64 {
    100
}

fn default_reconnect_backoff() -> u64 {
    1_000
}

fn default_max_reconnect_backoff() -> u64 {
    30_000
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_retry() -> u64 {
    5_000
}

fn default_database_url() -> String {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return url;
    }
    let var = |name: &str, fallback: &str| std::env::var(name).unwrap_or_else(|_| fallback.into());
    format!(
        "postgres://{}:{}@{}:{}/{}",
        var("POSTGRES_USER", "postgres"),
        var("POSTGRES_PASSWORD", "postgres"),
        var("POSTGRES_HOST", "localhost"),
        var("POSTGRES_PORT", "5432"),
        var("POSTGRES_DB", "pet_weight_db"),
    )
}

fn default_db_max_connections() -> u32 {
    4
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_secret() -> String {
    std::env::var("SECRET_KEY").unwrap_or_default()
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_user_lookup() -> UserLookup {
    UserLookup::Database
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            listener: ListenerSettings::default(),
            heartbeat: HeartbeatConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            poll_interval_ms: default_poll_interval(),
            reconnect_backoff_ms: default_reconnect_backoff(),
            max_reconnect_backoff_ms: default_max_reconnect_backoff(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            retry_delay_ms: default_heartbeat_retry(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_db_max_connections(),
            connect_timeout_ms: default_connect_timeout(),
            install_triggers: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            algorithm: default_algorithm(),
            user_lookup: default_user_lookup(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

// Credentials stay out of logs.
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("max_connections", &self.max_connections)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("install_triggers", &self.install_triggers)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("algorithm", &self.algorithm)
            .field("user_lookup", &self.user_lookup)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if `RIPPLE_CONFIG` names a file that cannot be read.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("RIPPLE_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "ripple.toml",
            "/etc/ripple/ripple.toml",
            "~/.config/ripple/ripple.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host does not resolve.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid bind address: {}:{}", self.host, self.port))?
            .next()
            .with_context(|| format!("No address for host: {}", self.host))
    }

    /// Bridge settings derived from the listener and heartbeat sections.
    #[must_use]
    pub fn bridge(&self) -> BridgeConfig {
        BridgeConfig {
            listener: ListenerConfig {
                channel: self.listener.channel.clone(),
                poll_interval: Duration::from_millis(self.listener.poll_interval_ms),
                reconnect_backoff: Duration::from_millis(self.listener.reconnect_backoff_ms),
                max_reconnect_backoff: Duration::from_millis(
                    self.listener.max_reconnect_backoff_ms,
                ),
            },
            heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
            heartbeat_retry_delay: Duration::from_millis(self.heartbeat.retry_delay_ms),
        }
    }

    /// Time allowed for a single send.
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.send_timeout_ms)
    }
}
