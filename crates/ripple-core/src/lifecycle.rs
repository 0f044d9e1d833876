//! Start/stop control of the listener and heartbeat tasks.
//!
//! ```text
//! Stopped ──start()──▶ Starting ──▶ Running ──stop()──▶ Stopping ──▶ Stopped
//!                         │
//!                         └── subscribe failed ──▶ Stopped (error returned)
//! ```

use crate::broadcaster::Broadcaster;
use crate::heartbeat::{HeartbeatScheduler, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RETRY_DELAY};
use crate::listener::{Listener, ListenerConfig};
use crate::source::{NotificationSource, SourceError, Subscription};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    /// Lowercase name, as reported by the health endpoint.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// `start` was called while not stopped.
    #[error("Bridge is already {0}")]
    AlreadyStarted(LifecycleState),

    /// The initial subscription could not be opened.
    #[error("Failed to open notification subscription: {0}")]
    Subscribe(#[source] SourceError),
}

/// Bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Listener settings.
    pub listener: ListenerConfig,
    /// Interval between heartbeat passes.
    pub heartbeat_interval: Duration,
    /// Delay before retrying a failed heartbeat pass.
    pub heartbeat_retry_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

struct RunningTasks {
    cancel: CancellationToken,
    listener: JoinHandle<Option<Box<dyn Subscription>>>,
    heartbeat: JoinHandle<()>,
}

/// Owns the background tasks of the change pipeline.
///
/// One bridge is constructed at startup and shared by handle. `start` and
/// `stop` are serialized; only one set of tasks runs at a time.
pub struct Bridge {
    source: Arc<dyn NotificationSource>,
    broadcaster: Broadcaster,
    config: BridgeConfig,
    connected: Arc<AtomicBool>,
    state: watch::Sender<LifecycleState>,
    tasks: Mutex<Option<RunningTasks>>,
}

impl Bridge {
    /// Create a stopped bridge.
    #[must_use]
    pub fn new(
        source: Arc<dyn NotificationSource>,
        broadcaster: Broadcaster,
        config: BridgeConfig,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Stopped);
        Self {
            source,
            broadcaster,
            config,
            connected: Arc::new(AtomicBool::new(false)),
            state,
            tasks: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Whether the listener currently holds a live subscription.
    #[must_use]
    pub fn is_listener_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The broadcaster shared with the gateway and producers.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Open the subscription and launch the listener and heartbeat tasks.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::AlreadyStarted`] unless stopped, and
    /// [`BridgeError::Subscribe`] if the subscription cannot be opened; the
    /// bridge is left stopped in that case.
    pub async fn start(&self) -> Result<(), BridgeError> {
        let mut tasks = self.tasks.lock().await;
        let current = self.state();
        if current != LifecycleState::Stopped {
            return Err(BridgeError::AlreadyStarted(current));
        }

        self.transition(LifecycleState::Starting);
        info!(channel = %self.config.listener.channel, "Starting change bridge");

        let subscription = match self.source.subscribe(&self.config.listener.channel).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "Failed to start change bridge");
                self.transition(LifecycleState::Stopped);
                return Err(BridgeError::Subscribe(e));
            }
        };

        self.connected.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let listener = Listener::new(
            self.source.clone(),
            self.broadcaster.clone(),
            self.config.listener.clone(),
            self.connected.clone(),
        );
        let heartbeat = HeartbeatScheduler::new(
            self.broadcaster.clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_retry_delay,
        );

        *tasks = Some(RunningTasks {
            listener: tokio::spawn(listener.run(subscription, cancel.clone())),
            heartbeat: tokio::spawn(heartbeat.run(cancel.clone())),
            cancel,
        });

        self.transition(LifecycleState::Running);
        info!("Change bridge started");
        Ok(())
    }

    /// Stop both tasks, wait for them, then close the subscription.
    ///
    /// Stopping a stopped bridge is a no-op.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        let Some(running) = tasks.take() else {
            debug!("Change bridge already stopped");
            return;
        };

        self.transition(LifecycleState::Stopping);
        info!("Stopping change bridge");
        running.cancel.cancel();

        let subscription = match running.listener.await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "Listener task failed");
                None
            }
        };
        if let Err(e) = running.heartbeat.await {
            error!(error = %e, "Heartbeat task failed");
        }

        if let Some(subscription) = subscription {
            match subscription.close().await {
                Ok(()) => info!("Notification subscription closed"),
                Err(e) => warn!(error = %e, "Error closing notification subscription"),
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.transition(LifecycleState::Stopped);
        info!("Change bridge stopped");
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        debug!(from = %previous, to = %next, "Bridge state change");
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(running) = self.tasks.get_mut() {
            running.cancel.cancel();
        }
    }
}
