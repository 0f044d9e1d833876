//! Live connection registry.
//!
//! Maps each user to the set of connections currently open for that user.
//! A user key exists only while its set is non-empty.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ripple_protocol::UserId;
use ripple_transport::{ConnectionId, MessageSink, TransportError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A client connection as seen by the fanout pipeline.
///
/// Cloning is cheap; every clone refers to the same transport. The gateway
/// task that accepted the connection owns its read half and waits on
/// [`Connection::closed`] to learn that the pipeline gave up on it.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    sink: Arc<dyn MessageSink>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection handle.
    #[must_use]
    pub fn new(id: ConnectionId, user_id: UserId, sink: Arc<dyn MessageSink>) -> Self {
        Self {
            id,
            user_id,
            sink,
            closed: CancellationToken::new(),
        }
    }

    /// Get the connection id.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Get the owning user.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Send one text message through the transport.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the send fails.
    pub async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.sink.send_text(text).await
    }

    /// Close the transport with a close code.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the close frame cannot be sent.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.closed.cancel();
        self.sink.close(code, reason).await
    }

    /// Signal the owning gateway task that this connection is dead.
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// Whether the connection has been marked dead.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Completes once the connection is marked dead.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("open", &self.sink.is_open())
            .finish()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of users with at least one connection.
    pub user_count: usize,
    /// Number of live connections.
    pub connection_count: usize,
}

/// Concurrency-safe mapping from user to live connections.
///
/// Each operation holds the shard lock for the user's entry for its whole
/// duration, so `register`, `unregister` and `connections_for` are atomic
/// with respect to each other. Callers only ever receive snapshots; no lock
/// is held while messages are sent.
#[derive(Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to its user's set.
    ///
    /// Returns `false` if a connection with the same id was already present;
    /// the existing entry is kept.
    pub fn register(&self, connection: Connection) -> bool {
        let user_id = connection.user_id().clone();
        let connection_id = connection.id().clone();

        let mut set = self.users.entry(user_id.clone()).or_default();
        let added = match set.entry(connection_id.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(connection);
                true
            }
        };

        debug!(
            user = %user_id,
            connection = %connection_id,
            connections = set.len(),
            added,
            "Registered connection"
        );
        added
    }

    /// Remove a connection, dropping the user key when its set empties.
    ///
    /// Returns `true` if the connection was present.
    pub fn unregister(&self, user_id: &UserId, connection_id: &ConnectionId) -> bool {
        match self.users.entry(user_id.clone()) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(connection_id).is_some();
                let remaining = entry.get().len();
                if remaining == 0 {
                    entry.remove();
                }
                if removed {
                    debug!(
                        user = %user_id,
                        connection = %connection_id,
                        connections = remaining,
                        "Unregistered connection"
                    );
                }
                removed
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Snapshot of the connections registered for a user.
    #[must_use]
    pub fn connections_for(&self, user_id: &UserId) -> Vec<Connection> {
        self.users
            .get(user_id)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Check whether a specific connection is registered.
    #[must_use]
    pub fn contains(&self, user_id: &UserId, connection_id: &ConnectionId) -> bool {
        self.users
            .get(user_id)
            .map(|set| set.contains_key(connection_id))
            .unwrap_or(false)
    }

    /// Users with at least one live connection.
    #[must_use]
    pub fn users(&self) -> Vec<UserId> {
        self.users.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of every user's connections.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(UserId, Vec<Connection>)> {
        self.users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().values().cloned().collect()))
            .collect()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            user_count: self.users.len(),
            connection_count: self.users.iter().map(|entry| entry.value().len()).sum(),
        }
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
