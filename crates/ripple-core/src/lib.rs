//! # ripple-core
//!
//! The change-capture-to-fanout pipeline of the Ripple service.
//!
//! - **Registry** - which live connections belong to which user
//! - **Broadcaster** - best-effort delivery to every connection of a user
//! - **Heartbeat** - periodic liveness probes that prune dead connections
//! - **Listener** - polls the store's notification channel and forwards events
//! - **Bridge** - starts and stops the listener and heartbeat tasks
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Notification │──▶│ Listener │──▶│ Broadcaster │──▶│ Connections  │
//! │   channel    │   └──────────┘   └─────────────┘   └──────────────┘
//! └──────────────┘                        │   ▲               ▲
//!                                         ▼   │               │
//!                                    ┌──────────┐      ┌─────────────┐
//!                                    │ Registry │◀─────│  Heartbeat  │
//!                                    └──────────┘      └─────────────┘
//! ```

pub mod auth;
pub mod broadcaster;
pub mod heartbeat;
pub mod lifecycle;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod source;

#[cfg(test)]
pub(crate) mod testutil;

pub use auth::{AuthError, Authenticator, StaticAuthenticator};
pub use broadcaster::{Broadcaster, DeliveryReport};
pub use heartbeat::HeartbeatScheduler;
pub use lifecycle::{Bridge, BridgeConfig, BridgeError, LifecycleState};
pub use listener::{Listener, ListenerConfig};
pub use registry::{Connection, ConnectionRegistry, RegistryStats};
pub use ripple_protocol::{ChangeEvent, ServerMessage, UserId};
pub use source::{NotificationSource, SourceError, Subscription};
