//! Outbound messages pushed to WebSocket clients.
//!
//! Every server-to-client message is a JSON text frame:
//!
//! ```json
//! { "type": "WEIGHTS_DELETED", "data": { "id": "...", "animal_id": "..." } }
//! { "type": "HEARTBEAT" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Message type of the liveness probe.
pub const HEARTBEAT: &str = "HEARTBEAT";

/// WebSocket close codes used by the gateway.
pub mod close_code {
    /// Authentication failed.
    pub const POLICY_VIOLATION: u16 = 1008;
    /// Unexpected processing fault.
    pub const INTERNAL_ERROR: u16 = 1011;
    /// The server is at its connection limit.
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// Protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A server-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Message type, e.g. `ANIMALS_UPDATED` or `HEARTBEAT`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Message body; absent for heartbeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerMessage {
    /// Create a message.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Create the liveness probe.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(HEARTBEAT, None)
    }

    /// Whether this is a liveness probe.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.kind == HEARTBEAT
    }
}

/// Encode a message to its JSON text form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &ServerMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}
