//! # ripple-transport
//!
//! Transport abstraction layer for the Ripple fanout service.
//!
//! The core pipeline never touches a socket directly. It writes through the
//! [`MessageSink`] trait, which serializes concurrent writers (a broadcast and
//! a heartbeat can target the same connection at the same instant) and maps
//! every failure to a [`TransportError`] the broadcaster treats as "prune".
//!
//! ```rust,ignore
//! use ripple_transport::{websocket, MessageSink};
//!
//! let (sink, stream) = websocket::split_socket(socket, send_timeout);
//! sink.send_text(r#"{"type":"HEARTBEAT"}"#).await?;
//! websocket::drain_until_close(stream).await?;
//! ```

pub mod traits;
pub mod websocket;

pub use traits::{ConnectionId, MessageSink, TransportError};
pub use websocket::{drain_until_close, split_socket, WebSocketSink, DEFAULT_SEND_TIMEOUT};
