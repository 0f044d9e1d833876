//! WebSocket transport implementation.
//!
//! Wraps the write half of an axum WebSocket in a [`MessageSink`] and
//! provides the read-and-discard loop the gateway runs until the client goes
//! away.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::traits::{MessageSink, TransportError};

/// Default time allowed for a single send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Write half of a WebSocket connection.
///
/// The underlying sink sits behind an async mutex, so sends from different
/// tasks are written one at a time. A send that errors or exceeds the send
/// timeout marks the sink closed; later sends fail fast.
pub struct WebSocketSink<S = SplitSink<WebSocket, Message>> {
    sender: Mutex<S>,
    is_open: AtomicBool,
    send_timeout: Duration,
}

impl<S> WebSocketSink<S> {
    /// Create a sink over the write half of a socket.
    #[must_use]
    pub fn new(sender: S, send_timeout: Duration) -> Self {
        Self {
            sender: Mutex::new(sender),
            is_open: AtomicBool::new(true),
            send_timeout,
        }
    }
}

impl<S> WebSocketSink<S>
where
    S: Sink<Message> + Unpin + Send,
    S::Error: fmt::Display,
{
    async fn send_message(&self, message: Message) -> Result<(), TransportError> {
        let send = async {
            let mut sender = self.sender.lock().await;
            sender.send(message).await
        };

        match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.is_open.store(false, Ordering::SeqCst);
                Err(TransportError::SendFailed(e.to_string()))
            }
            Err(_) => {
                self.is_open.store(false, Ordering::SeqCst);
                Err(TransportError::Timeout)
            }
        }
    }
}

#[async_trait]
impl<S> MessageSink for WebSocketSink<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.send_message(Message::Text(text.to_owned())).await
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(()); // Already closed
        }

        let frame = CloseFrame {
            code,
            reason: Cow::Owned(reason.to_owned()),
        };
        let close = async {
            let mut sender = self.sender.lock().await;
            sender.send(Message::Close(Some(frame))).await
        };

        match tokio::time::timeout(self.send_timeout, close).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Other(format!("Failed to close: {}", e))),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }
}

/// Split an upgraded socket into a shared sink and its read half.
#[must_use]
pub fn split_socket(
    socket: WebSocket,
    send_timeout: Duration,
) -> (Arc<WebSocketSink>, SplitStream<WebSocket>) {
    let (sender, receiver) = socket.split();
    (Arc::new(WebSocketSink::new(sender, send_timeout)), receiver)
}

/// Read and discard inbound messages until the client closes.
///
/// Returns `Ok(())` on a close frame or end of stream, and an error if the
/// transport fails first.
///
/// # Errors
///
/// Returns [`TransportError::ReceiveFailed`] on a transport-level error.
pub async fn drain_until_close<St, E>(mut stream: St) -> Result<(), TransportError>
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(frame)) => {
                debug!(code = ?frame.as_ref().map(|f| f.code), "Received close frame");
                return Ok(());
            }
            Ok(Message::Text(text)) => {
                trace!(bytes = text.len(), "Discarding inbound text message");
            }
            Ok(Message::Binary(data)) => {
                trace!(bytes = data.len(), "Discarding inbound binary message");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Pongs are queued by the protocol layer
            }
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                return Err(TransportError::ReceiveFailed(e.to_string()));
            }
        }
    }

    debug!("WebSocket stream ended");
    Ok(())
}
