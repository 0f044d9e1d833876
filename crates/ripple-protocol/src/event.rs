//! Change events decoded from the store's notification channel.
//!
//! Each trigger emits a JSON object of the form
//!
//! ```json
//! { "table": "weights", "operation": "DELETE", "owner_id": "...", "data": { ... } }
//! ```
//!
//! The shape of `data` depends on the `(table, operation)` pair: deletes carry
//! only identifying columns, inserts and updates carry the full projection of
//! the row. Decoding selects the matching variant and validates the fields it
//! needs; columns it does not model are kept and passed through to clients.

use crate::identity::UserId;
use crate::message::ServerMessage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding a notification payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not a JSON object of the expected shape.
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A required top-level field is absent or null.
    #[error("Missing field `{0}`")]
    MissingField(&'static str),

    /// The table is not one of the tracked entities.
    #[error("Unknown table `{0}`")]
    UnknownTable(String),

    /// The operation is not INSERT, UPDATE or DELETE.
    #[error("Unknown operation `{0}`")]
    UnknownOperation(String),

    /// The owner id cannot be used as a routing key.
    #[error("Invalid owner id: {0}")]
    InvalidOwner(&'static str),

    /// The `data` object does not match the shape for its table and operation.
    #[error("Invalid {entity} {operation} data: {source}")]
    InvalidData {
        entity: EntityKind,
        operation: Operation,
        #[source]
        source: serde_json::Error,
    },
}

/// Tracked entity tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// The `animals` table; rows carry their owner directly.
    Animals,
    /// The `weights` table; the owner is resolved through the parent animal.
    Weights,
}

impl EntityKind {
    /// Table name as emitted by the trigger.
    #[must_use]
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Animals => "animals",
            EntityKind::Weights => "weights",
        }
    }

    /// Look up an entity by table name.
    #[must_use]
    pub fn from_table(table: &str) -> Option<Self> {
        [EntityKind::Animals, EntityKind::Weights]
            .into_iter()
            .find(|kind| kind.table().eq_ignore_ascii_case(table))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Row operation reported by the trigger (`TG_OP`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Wire name of the operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    /// Parse a wire operation name.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        [Operation::Insert, Operation::Update, Operation::Delete]
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversion of a typed payload back into the JSON object sent to clients.
trait Projection {
    fn to_data(&self) -> Value;
}

/// Full projection of an `animals` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimalRecord {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    /// Remaining projected columns (`created_at`, `updated_at`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Projection for AnimalRecord {
    fn to_data(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("id".into(), Value::from(self.id.as_str()));
        map.insert("name".into(), Value::from(self.name.as_str()));
        map.insert("owner_id".into(), Value::from(self.owner_id.as_str()));
        Value::Object(map)
    }
}

/// Identifying columns of a deleted `animals` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimalKey {
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Projection for AnimalKey {
    fn to_data(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("id".into(), Value::from(self.id.as_str()));
        Value::Object(map)
    }
}

/// Full projection of a `weights` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    pub id: String,
    pub animal_id: String,
    pub weight: f64,
    /// Remaining projected columns (`date`, `created_at`, `updated_at`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Projection for WeightRecord {
    fn to_data(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("id".into(), Value::from(self.id.as_str()));
        map.insert("animal_id".into(), Value::from(self.animal_id.as_str()));
        map.insert("weight".into(), Value::from(self.weight));
        Value::Object(map)
    }
}

/// Identifying columns of a deleted `weights` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightKey {
    pub id: String,
    pub animal_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Projection for WeightKey {
    fn to_data(&self) -> Value {
        let mut map = self.extra.clone();
        map.insert("id".into(), Value::from(self.id.as_str()));
        map.insert("animal_id".into(), Value::from(self.animal_id.as_str()));
        Value::Object(map)
    }
}

/// A create, update or delete of one row.
///
/// `R` is the full-row projection, `K` the identifying key left after a delete.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange<R, K> {
    Created(R),
    Updated(R),
    Deleted(K),
}

impl<R: DeserializeOwned, K: DeserializeOwned> RecordChange<R, K> {
    fn decode(operation: Operation, data: Value) -> Result<Self, serde_json::Error> {
        Ok(match operation {
            Operation::Insert => RecordChange::Created(serde_json::from_value(data)?),
            Operation::Update => RecordChange::Updated(serde_json::from_value(data)?),
            Operation::Delete => RecordChange::Deleted(serde_json::from_value(data)?),
        })
    }
}

impl<R, K> RecordChange<R, K> {
    /// The row operation this change came from.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            RecordChange::Created(_) => Operation::Insert,
            RecordChange::Updated(_) => Operation::Update,
            RecordChange::Deleted(_) => Operation::Delete,
        }
    }
}

impl<R: Projection, K: Projection> RecordChange<R, K> {
    fn data(&self) -> Value {
        match self {
            RecordChange::Created(record) | RecordChange::Updated(record) => record.to_data(),
            RecordChange::Deleted(key) => key.to_data(),
        }
    }
}

/// A typed change, keyed by entity and operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Animal(RecordChange<AnimalRecord, AnimalKey>),
    Weight(RecordChange<WeightRecord, WeightKey>),
}

impl Change {
    /// The entity table this change belongs to.
    #[must_use]
    pub fn entity(&self) -> EntityKind {
        match self {
            Change::Animal(_) => EntityKind::Animals,
            Change::Weight(_) => EntityKind::Weights,
        }
    }

    /// The row operation.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Change::Animal(change) => change.operation(),
            Change::Weight(change) => change.operation(),
        }
    }

    /// Client-facing JSON projection of the changed row.
    #[must_use]
    pub fn data(&self) -> Value {
        match self {
            Change::Animal(change) => change.data(),
            Change::Weight(change) => change.data(),
        }
    }
}

/// A committed mutation routed to the user that owns the record.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    owner_id: UserId,
    change: Change,
}

impl ChangeEvent {
    /// Create an event for an in-process producer.
    #[must_use]
    pub fn new(owner_id: UserId, change: Change) -> Self {
        Self { owner_id, change }
    }

    /// The owning user.
    #[must_use]
    pub fn owner_id(&self) -> &UserId {
        &self.owner_id
    }

    /// The typed change.
    #[must_use]
    pub fn change(&self) -> &Change {
        &self.change
    }

    /// The entity table.
    #[must_use]
    pub fn entity(&self) -> EntityKind {
        self.change.entity()
    }

    /// The row operation.
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.change.operation()
    }

    /// Outbound message type, `{TABLE}_{OPERATION}D` uppercased.
    ///
    /// A delete on `weights` yields `WEIGHTS_DELETED`; an insert yields
    /// `WEIGHTS_INSERTD`, which is the name existing clients subscribe to.
    #[must_use]
    pub fn message_type(&self) -> String {
        format!("{}_{}D", self.entity().table(), self.operation().as_str()).to_uppercase()
    }

    /// Client-facing JSON projection of the changed row.
    #[must_use]
    pub fn data(&self) -> Value {
        self.change.data()
    }

    /// Build the message delivered to the owner's connections.
    #[must_use]
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::new(self.message_type(), Some(self.data()))
    }
}

/// Top-level notification fields. Every field is optional here so a missing
/// one can be reported by name.
#[derive(Debug, Deserialize)]
struct RawNotification {
    table: Option<String>,
    operation: Option<String>,
    owner_id: Option<String>,
    data: Option<Value>,
}

/// Decode a raw notification payload into a [`ChangeEvent`].
///
/// # Errors
///
/// Returns a [`DecodeError`] when the payload is not valid JSON, a required
/// field is missing or null, the table or operation is unknown, the owner id
/// is unusable, or `data` lacks a field required by its variant.
pub fn decode_notification(payload: &str) -> Result<ChangeEvent, DecodeError> {
    let raw: RawNotification = serde_json::from_str(payload)?;

    let table = raw.table.ok_or(DecodeError::MissingField("table"))?;
    let operation = raw.operation.ok_or(DecodeError::MissingField("operation"))?;
    // A null owner means the trigger's parent lookup found nothing.
    let owner = raw.owner_id.ok_or(DecodeError::MissingField("owner_id"))?;
    let data = raw.data.ok_or(DecodeError::MissingField("data"))?;

    let entity = EntityKind::from_table(&table).ok_or(DecodeError::UnknownTable(table))?;
    let operation =
        Operation::from_wire(&operation).ok_or(DecodeError::UnknownOperation(operation))?;
    let owner_id = UserId::parse(owner).map_err(DecodeError::InvalidOwner)?;

    let invalid = |source| DecodeError::InvalidData {
        entity,
        operation,
        source,
    };
    let change = match entity {
        EntityKind::Animals => {
            Change::Animal(RecordChange::decode(operation, data).map_err(invalid)?)
        }
        EntityKind::Weights => {
            Change::Weight(RecordChange::decode(operation, data).map_err(invalid)?)
        }
    };

    Ok(ChangeEvent { owner_id, change })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_weight_delete() {
        let raw = r#"{"table":"weights","operation":"DELETE","owner_id":"u1",
                      "data":{"id":"w1","animal_id":"a1"}}"#;

        let event = decode_notification(raw).unwrap();
        assert_eq!(event.owner_id().as_str(), "u1");
        assert_eq!(event.entity(), EntityKind::Weights);
        assert_eq!(event.operation(), Operation::Delete);
        assert_eq!(event.message_type(), "WEIGHTS_DELETED");
        assert_eq!(event.data(), json!({"id": "w1", "animal_id": "a1"}));
    }

    #[test]
    fn test_decode_animal_update_passes_columns_through() {
        let raw = json!({
            "table": "animals",
            "operation": "UPDATE",
            "owner_id": "u2",
            "data": {
                "id": "a1",
                "name": "Biscuit",
                "owner_id": "u2",
                "created_at": "2024-03-19T16:45:00",
                "updated_at": null
            }
        })
        .to_string();

        let event = decode_notification(&raw).unwrap();
        assert_eq!(event.message_type(), "ANIMALS_UPDATED");
        match event.change() {
            Change::Animal(RecordChange::Updated(record)) => assert_eq!(record.name, "Biscuit"),
            other => panic!("unexpected change {other:?}"),
        }
        assert_eq!(
            event.data(),
            json!({
                "id": "a1",
                "name": "Biscuit",
                "owner_id": "u2",
                "created_at": "2024-03-19T16:45:00",
                "updated_at": null
            })
        );
    }

    #[test]
    fn test_decode_weight_insert() {
        let raw = json!({
            "table": "weights",
            "operation": "INSERT",
            "owner_id": "u1",
            "data": {"id": "w2", "animal_id": "a1", "weight": 4.25, "date": "2024-03-20"}
        })
        .to_string();

        let event = decode_notification(&raw).unwrap();
        assert_eq!(event.message_type(), "WEIGHTS_INSERTD");
        let message = event.to_message();
        assert_eq!(message.data.unwrap()["weight"], json!(4.25));
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(matches!(
            decode_notification("{not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        let raw = json!({"table": "animals", "operation": "DELETE", "data": {"id": "a1"}});
        assert!(matches!(
            decode_notification(&raw.to_string()),
            Err(DecodeError::MissingField("owner_id"))
        ));

        // The weights trigger emits a null owner when the parent animal is gone.
        let raw = json!({"table": "weights", "operation": "DELETE", "owner_id": null,
                         "data": {"id": "w1", "animal_id": "a1"}});
        assert!(matches!(
            decode_notification(&raw.to_string()),
            Err(DecodeError::MissingField("owner_id"))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_table_and_operation() {
        let raw = json!({"table": "users", "operation": "DELETE", "owner_id": "u1", "data": {}});
        assert!(matches!(
            decode_notification(&raw.to_string()),
            Err(DecodeError::UnknownTable(t)) if t == "users"
        ));

        let raw = json!({"table": "animals", "operation": "TRUNCATE", "owner_id": "u1", "data": {}});
        assert!(matches!(
            decode_notification(&raw.to_string()),
            Err(DecodeError::UnknownOperation(_))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_owner() {
        let raw = json!({"table": "animals", "operation": "DELETE", "owner_id": "",
                         "data": {"id": "a1"}});
        assert!(matches!(
            decode_notification(&raw.to_string()),
            Err(DecodeError::InvalidOwner(_))
        ));
    }

    #[test]
    fn test_decode_rejects_incomplete_data() {
        let raw = json!({"table": "weights", "operation": "INSERT", "owner_id": "u1",
                         "data": {"id": "w1", "animal_id": "a1"}});
        assert!(matches!(
            decode_notification(&raw.to_string()),
            Err(DecodeError::InvalidData { entity: EntityKind::Weights, operation: Operation::Insert, .. })
        ));
    }

    #[test]
    fn test_entity_and_operation_lookup() {
        assert_eq!(EntityKind::from_table("animals"), Some(EntityKind::Animals));
        assert_eq!(EntityKind::from_table("WEIGHTS"), Some(EntityKind::Weights));
        assert_eq!(EntityKind::from_table("media"), None);
        assert_eq!(Operation::from_wire("update"), Some(Operation::Update));
        assert_eq!(Operation::from_wire("UPSERT"), None);
    }
}
