//! Test doubles for the store and the client transport.

use crate::registry::Connection;
use crate::source::{NotificationSource, SourceError, Subscription};
use async_trait::async_trait;
use ripple_protocol::UserId;
use ripple_transport::{ConnectionId, MessageSink, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Build a connection over a recording sink.
pub(crate) fn connection(id: &str, user: &str, sink: Arc<RecordingSink>) -> Connection {
    Connection::new(
        ConnectionId::new(id),
        UserId::parse(user).unwrap(),
        sink as Arc<dyn MessageSink>,
    )
}

/// A sink that records what it was sent and can be told to fail.
#[derive(Default)]
pub(crate) struct RecordingSink {
    sent: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    closed_with: Mutex<Option<u16>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        let sink = Self::new();
        sink.set_failing(true);
        sink
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap()
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn close(&self, code: u16, _reason: &str) -> Result<(), TransportError> {
        *self.closed_with.lock().unwrap() = Some(code);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.closed_with.lock().unwrap().is_none()
    }
}

#[derive(Default)]
struct MemoryState {
    unreachable: bool,
    generation: u64,
    pending: VecDeque<String>,
    subscribes: usize,
    poll_errors: usize,
    closed: usize,
}

/// In-memory notification channel.
///
/// `sever` drops every open subscription and makes the store unreachable
/// until `restore` is called, mimicking a lost database connection.
#[derive(Clone, Default)]
pub(crate) struct MemorySource {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn notify(&self, payload: impl Into<String>) {
        self.state.lock().unwrap().pending.push_back(payload.into());
    }

    pub(crate) fn sever(&self) {
        let mut state = self.state.lock().unwrap();
        state.unreachable = true;
        state.generation += 1;
    }

    pub(crate) fn restore(&self) {
        self.state.lock().unwrap().unreachable = false;
    }

    /// Make the next `count` polls fail without losing the connection.
    pub(crate) fn fail_polls(&self, count: usize) {
        self.state.lock().unwrap().poll_errors = count;
    }

    pub(crate) fn subscribe_attempts(&self) -> usize {
        self.state.lock().unwrap().subscribes
    }

    pub(crate) fn closed_subscriptions(&self) -> usize {
        self.state.lock().unwrap().closed
    }
}

#[async_trait]
impl NotificationSource for MemorySource {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, SourceError> {
        let mut state = self.state.lock().unwrap();
        state.subscribes += 1;
        if state.unreachable {
            return Err(SourceError::Subscribe(format!("{channel}: connection refused")));
        }
        Ok(Box::new(MemorySubscription {
            state: self.state.clone(),
            generation: state.generation,
        }))
    }
}

struct MemorySubscription {
    state: Arc<Mutex<MemoryState>>,
    generation: u64,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn poll(&mut self, wait: Duration) -> Result<Vec<String>, SourceError> {
        let drained = {
            let mut state = self.state.lock().unwrap();
            if state.generation != self.generation {
                return Err(SourceError::ConnectionLost("server closed the connection".into()));
            }
            if state.poll_errors > 0 {
                state.poll_errors -= 1;
                return Err(SourceError::Poll("temporary failure".into()));
            }
            state.pending.drain(..).collect::<Vec<_>>()
        };

        if drained.is_empty() {
            tokio::time::sleep(wait).await;
        }
        Ok(drained)
    }

    async fn close(self: Box<Self>) -> Result<(), SourceError> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}
