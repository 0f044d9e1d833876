//! Fanout of messages to a user's live connections.

use crate::metrics;
use crate::registry::{Connection, ConnectionRegistry};
use futures_util::future::join_all;
use ripple_protocol::{encode, ChangeEvent, ProtocolError, ServerMessage, UserId};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of a fanout pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections removed from the registry because the send failed.
    pub pruned: usize,
}

/// Delivers messages to registered connections.
///
/// Delivery is best-effort and at most once per connection: a failed send is
/// never retried, the connection is pruned instead. Sends run concurrently
/// and outside any registry lock.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Get the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver `message` to every connection registered for `user_id`.
    ///
    /// A user with no connections is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub async fn broadcast_to_user(
        &self,
        user_id: &UserId,
        message: &ServerMessage,
    ) -> Result<DeliveryReport, ProtocolError> {
        let targets = self.registry.connections_for(user_id);
        if targets.is_empty() {
            trace!(user = %user_id, kind = %message.kind, "No live connections");
            return Ok(DeliveryReport::default());
        }

        let text = encode(message)?;
        let report = self.deliver(targets, &text, "change").await;

        debug!(
            user = %user_id,
            kind = %message.kind,
            delivered = report.delivered,
            pruned = report.pruned,
            "Broadcast to user"
        );
        Ok(report)
    }

    /// Deliver a change event to its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub async fn publish(&self, event: &ChangeEvent) -> Result<DeliveryReport, ProtocolError> {
        self.broadcast_to_user(event.owner_id(), &event.to_message())
            .await
    }

    /// Deliver `message` to every registered connection of every user.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub async fn broadcast_all(
        &self,
        message: &ServerMessage,
    ) -> Result<DeliveryReport, ProtocolError> {
        let targets: Vec<Connection> = self
            .registry
            .snapshot()
            .into_iter()
            .flat_map(|(_, connections)| connections)
            .collect();
        if targets.is_empty() {
            return Ok(DeliveryReport::default());
        }

        let text = encode(message)?;
        let kind = if message.is_heartbeat() {
            "heartbeat"
        } else {
            "change"
        };
        Ok(self.deliver(targets, &text, kind).await)
    }

    /// Send to each target, then prune the ones that failed.
    async fn deliver(
        &self,
        targets: Vec<Connection>,
        text: &str,
        kind: &'static str,
    ) -> DeliveryReport {
        let results = join_all(targets.iter().map(|conn| async move {
            let result = conn.send_text(text).await;
            (conn, result)
        }))
        .await;

        let mut report = DeliveryReport::default();
        let mut dead = Vec::new();
        for (conn, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        user = %conn.user_id(),
                        connection = %conn.id(),
                        error = %e,
                        kind,
                        "Delivery failed, pruning connection"
                    );
                    dead.push(conn);
                }
            }
        }

        for conn in dead {
            if self.registry.unregister(conn.user_id(), conn.id()) {
                report.pruned += 1;
            }
            conn.mark_closed();
        }

        metrics::record_delivery(kind, report.delivered, report.pruned);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{connection, RecordingSink};
    use ripple_protocol::decode_notification;
    use serde_json::{json, Value};

    fn setup() -> (Arc<ConnectionRegistry>, Broadcaster) {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        (registry, broadcaster)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_owner() {
        let (registry, broadcaster) = setup();
        let a1 = RecordingSink::new();
        let a2 = RecordingSink::new();
        let b1 = RecordingSink::new();
        registry.register(connection("a1", "u1", a1.clone()));
        registry.register(connection("a2", "u1", a2.clone()));
        registry.register(connection("b1", "u2", b1.clone()));

        let u1 = UserId::parse("u1").unwrap();
        let message = ServerMessage::new("ANIMALS_DELETED", Some(json!({"id": "x"})));
        let report = broadcaster.broadcast_to_user(&u1, &message).await.unwrap();

        assert_eq!(report, DeliveryReport { delivered: 2, pruned: 0 });
        assert_eq!(a1.sent().len(), 1);
        assert_eq!(a2.sent().len(), 1);
        assert!(b1.sent().is_empty());
        assert_eq!(b1.attempts(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_to_absent_user_is_noop() {
        let (registry, broadcaster) = setup();
        let other = RecordingSink::new();
        registry.register(connection("b1", "u2", other.clone()));

        let nobody = UserId::parse("nobody").unwrap();
        let report = broadcaster
            .broadcast_to_user(&nobody, &ServerMessage::heartbeat())
            .await
            .unwrap();

        assert_eq!(report, DeliveryReport::default());
        assert_eq!(other.attempts(), 0);
        assert!(registry.connections_for(&nobody).is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_prunes_only_that_connection() {
        let (registry, broadcaster) = setup();
        let good = RecordingSink::new();
        let bad = RecordingSink::failing();
        let bad_conn = connection("bad", "u1", bad.clone());
        registry.register(connection("good", "u1", good.clone()));
        registry.register(bad_conn.clone());

        let u1 = UserId::parse("u1").unwrap();
        let report = broadcaster
            .broadcast_to_user(&u1, &ServerMessage::new("X", None))
            .await
            .unwrap();

        assert_eq!(report, DeliveryReport { delivered: 1, pruned: 1 });
        assert_eq!(good.sent().len(), 1);
        assert!(!registry.contains(&u1, bad_conn.id()));
        assert!(bad_conn.is_closed());
        assert_eq!(registry.connections_for(&u1).len(), 1);
    }

    #[tokio::test]
    async fn test_pruning_last_connection_removes_user() {
        let (registry, broadcaster) = setup();
        registry.register(connection("bad", "u1", RecordingSink::failing()));

        let u1 = UserId::parse("u1").unwrap();
        broadcaster
            .broadcast_to_user(&u1, &ServerMessage::new("X", None))
            .await
            .unwrap();

        assert!(registry.connections_for(&u1).is_empty());
        assert!(registry.users().is_empty());
    }

    #[tokio::test]
    async fn test_connection_failing_later_is_pruned_then() {
        let (registry, broadcaster) = setup();
        let sink = RecordingSink::new();
        registry.register(connection("c1", "u1", sink.clone()));
        let u1 = UserId::parse("u1").unwrap();
        let message = ServerMessage::new("X", None);

        let first = broadcaster.broadcast_to_user(&u1, &message).await.unwrap();
        assert_eq!(first, DeliveryReport { delivered: 1, pruned: 0 });

        sink.set_failing(true);
        let second = broadcaster.broadcast_to_user(&u1, &message).await.unwrap();
        assert_eq!(second, DeliveryReport { delivered: 0, pruned: 1 });
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_registration_delivers_once() {
        let (registry, broadcaster) = setup();
        let sink = RecordingSink::new();
        let conn = connection("c1", "u1", sink.clone());
        registry.register(conn.clone());
        registry.register(conn);

        let u1 = UserId::parse("u1").unwrap();
        broadcaster
            .broadcast_to_user(&u1, &ServerMessage::new("X", None))
            .await
            .unwrap();

        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_change_event() {
        let (registry, broadcaster) = setup();
        let owner = RecordingSink::new();
        let other = RecordingSink::new();
        registry.register(connection("c1", "u1", owner.clone()));
        registry.register(connection("c2", "u2", other.clone()));

        let event = decode_notification(
            r#"{"table":"weights","operation":"DELETE","owner_id":"u1",
                "data":{"id":"w1","animal_id":"a1"}}"#,
        )
        .unwrap();
        broadcaster.publish(&event).await.unwrap();

        let sent = owner.sent();
        assert_eq!(sent.len(), 1);
        let value: Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(
            value,
            json!({"type": "WEIGHTS_DELETED", "data": {"id": "w1", "animal_id": "a1"}})
        );
        assert!(other.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_all() {
        let (registry, broadcaster) = setup();
        let a = RecordingSink::new();
        let b = RecordingSink::new();
        registry.register(connection("a", "u1", a.clone()));
        registry.register(connection("b", "u2", b.clone()));

        let report = broadcaster
            .broadcast_all(&ServerMessage::heartbeat())
            .await
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(a.sent(), vec![r#"{"type":"HEARTBEAT"}"#.to_string()]);
        assert_eq!(b.sent().len(), 1);
    }
}
