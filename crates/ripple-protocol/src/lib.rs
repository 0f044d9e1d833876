//! # ripple-protocol
//!
//! Wire definitions for the Ripple change-fanout service.
//!
//! This crate describes both ends of the pipeline:
//!
//! - **Inbound** - the JSON payload emitted by the store's change triggers
//!   on the notification channel, decoded into a typed [`ChangeEvent`].
//! - **Outbound** - the `{ "type": ..., "data": ... }` JSON messages pushed
//!   to WebSocket clients, including the `HEARTBEAT` probe.
//!
//! ## Example
//!
//! ```rust
//! use ripple_protocol::{decode_notification, encode};
//!
//! let raw = r#"{"table":"weights","operation":"DELETE","owner_id":"u1",
//!               "data":{"id":"w1","animal_id":"a1"}}"#;
//!
//! let event = decode_notification(raw).unwrap();
//! assert_eq!(event.message_type(), "WEIGHTS_DELETED");
//!
//! let text = encode(&event.to_message()).unwrap();
//! assert!(text.contains("WEIGHTS_DELETED"));
//! ```

pub mod event;
pub mod identity;
pub mod message;

pub use event::{
    decode_notification, AnimalKey, AnimalRecord, Change, ChangeEvent, DecodeError, EntityKind,
    Operation, RecordChange, WeightKey, WeightRecord,
};
pub use identity::UserId;
pub use message::{close_code, encode, ProtocolError, ServerMessage, HEARTBEAT};
