//! Push channels: one persistent hub connection with startup, retry, and
//! reconnect policy, fanning named messages out to subscribers.
//!
//! This module provides [`PushConfig`] for tuning retry and reconnection
//! behaviour, [`PushChannel`] for owning one hub connection, and
//! [`PushHandle`] for controlling a running connection loop.
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//!      ^              |                            |
//!      +-- 401 / no credential / shutdown ---------+-- exhausted --> Disconnected
//! ```
//!
//! * Startup needs a credential from the token factory; without one the
//!   channel stays `Disconnected` and does not retry.
//! * A 401 from the hub is terminal at any point.
//! * Any other startup failure is retried after
//!   [`retry_delay`](PushConfig::retry_delay), forever, with no backoff.
//! * Once connected, a dropped connection is handled by the reconnect
//!   policy ([`reconnect_delays`](PushConfig::reconnect_delays)); running
//!   out of delays ends in `Disconnected`.
//!
//! Delivery is FIFO per connection. Nothing orders pushed messages against
//! the stores' own in-flight requests.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_stream::StreamExt;

use crate::auth::TokenFactory;
use crate::error::PushError;
use crate::event::HubMessage;
use crate::hub::{HubStream, HubTransport};

/// Configuration for push channel retry and reconnection behaviour.
///
/// All fields have defaults accessible via [`PushConfig::default()`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use hrm_client::PushConfig;
///
/// let config = PushConfig {
///     retry_delay: Duration::from_secs(1),
///     ..PushConfig::default()
/// };
/// assert_eq!(config.retry_delay, Duration::from_secs(1));
/// assert_eq!(config.reconnect_delays.len(), 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Fixed delay between startup attempts after a non-401 failure.
    ///
    /// Default: 3 seconds.
    #[serde(with = "crate::config::duration_ms")]
    pub retry_delay: Duration,

    /// Delays before each reconnect attempt after an established connection
    /// drops. One attempt per entry; when all fail the channel stops.
    ///
    /// Default: 0, 2, 10, and 30 seconds.
    #[serde(with = "crate::config::duration_ms_vec")]
    pub reconnect_delays: Vec<Duration>,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(3),
            reconnect_delays: vec![
                Duration::ZERO,
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
        }
    }
}

/// Connection state of a [`PushChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Handle for controlling a running push loop.
///
/// Dropping the handle does **not** stop the loop -- call
/// [`shutdown`](PushHandle::shutdown).
///
/// `Clone` is cheap; every clone observes the same loop outcome.
#[derive(Clone)]
pub struct PushHandle {
    /// Sends `true` to signal the loop to stop.
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Set once, when the loop exits.
    outcome: watch::Receiver<Option<Result<(), PushError>>>,
}

impl fmt::Debug for PushHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushHandle")
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl PushHandle {
    /// Returns `true` once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some() || self.outcome.has_changed().is_err()
    }

    /// Wait for the loop to exit on its own.
    ///
    /// Every call, from any clone, returns the same outcome.
    ///
    /// # Errors
    ///
    /// Returns the terminal error that stopped the loop, e.g.
    /// [`PushError::Unauthorized`].
    pub async fn wait(&self) -> Result<(), PushError> {
        let mut outcome = self.outcome.clone();
        let result = match outcome.wait_for(Option::is_some).await {
            Ok(done) => done.clone().unwrap_or(Ok(())),
            Err(_) => Err(PushError::Transport(
                "push loop exited without a result".to_owned(),
            )),
        };
        result
    }

    /// Signal the loop to stop and wait for it to exit.
    ///
    /// Calling `shutdown` more than once is safe.
    ///
    /// # Errors
    ///
    /// Returns the loop's terminal error if it had already stopped on one.
    pub async fn shutdown(&self) -> Result<(), PushError> {
        // The receiver may already be gone if the loop has exited.
        let _ = self.shutdown_tx.send(true);
        self.wait().await
    }
}

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<HubMessage>>>;

struct ChannelInner {
    hub: String,
    transport: Arc<dyn HubTransport>,
    tokens: TokenFactory,
    config: PushConfig,
    state_tx: watch::Sender<ConnectionState>,
    subscribers: Mutex<Subscribers>,
    running: tokio::sync::Mutex<Option<PushHandle>>,
}

impl ChannelInner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                tracing::debug!(hub = %self.hub, from = ?*current, to = ?state, "push state");
                *current = state;
                true
            }
        });
    }

    fn dispatch(&self, message: HubMessage) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        match subscribers.get_mut(&message.target) {
            Some(senders) => {
                senders.retain(|tx| tx.send(message.clone()).is_ok());
            }
            None => {
                tracing::trace!(hub = %self.hub, target = %message.target, "no subscriber for message");
            }
        }
    }
}

/// One persistent connection to one hub.
///
/// `Clone` is cheap; clones share the connection and subscriber lists.
#[derive(Clone)]
pub struct PushChannel {
    inner: Arc<ChannelInner>,
}

impl fmt::Debug for PushChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushChannel")
            .field("hub", &self.inner.hub)
            .field("state", &self.state())
            .finish()
    }
}

impl PushChannel {
    /// Create a disconnected channel for `hub`.
    ///
    /// # Arguments
    ///
    /// * `hub` - Hub path relative to the server root (e.g. `"/notificationHub"`).
    /// * `transport` - Opens the actual connections.
    /// * `tokens` - Credential source, read on every (re)connect attempt.
    /// * `config` - Retry and reconnect delays.
    pub fn new(
        hub: impl Into<String>,
        transport: Arc<dyn HubTransport>,
        tokens: TokenFactory,
        config: PushConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                hub: hub.into(),
                transport,
                tokens,
                config,
                state_tx,
                subscribers: Mutex::new(HashMap::new()),
                running: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// The hub path.
    pub fn hub(&self) -> &str {
        &self.inner.hub
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive every message named `event`, in arrival order.
    ///
    /// Subscriptions survive reconnects. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self, event: impl Into<String>) -> mpsc::UnboundedReceiver<HubMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.into())
            .or_default()
            .push(tx);
        rx
    }

    /// Start the connection loop in the background.
    ///
    /// A channel whose previous loop has exited may be started again.
    ///
    /// # Returns
    ///
    /// A [`PushHandle`] for waiting on or stopping the loop.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::MissingCredential`] without spawning anything
    /// if the token factory yields no credential, and
    /// [`PushError::AlreadyStarted`] if a loop is still running.
    pub async fn start(&self) -> Result<PushHandle, PushError> {
        let mut guard = self.inner.running.lock().await;
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            return Err(PushError::AlreadyStarted);
        }

        if (self.inner.tokens)().is_none() {
            tracing::info!(hub = %self.inner.hub, "no credential, push channel stays disconnected");
            self.inner.set_state(ConnectionState::Disconnected);
            return Err(PushError::MissingCredential);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outcome_tx, outcome) = watch::channel(None);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = run_push_loop(inner, shutdown_rx).await;
            outcome_tx.send_replace(Some(result));
        });

        let handle = PushHandle {
            shutdown_tx: Arc::new(shutdown_tx),
            outcome,
        };
        *guard = Some(handle.clone());
        Ok(handle)
    }

    /// Stop the loop if one is running.
    ///
    /// # Errors
    ///
    /// Returns the loop's terminal error if it had already stopped on one.
    pub async fn shutdown(&self) -> Result<(), PushError> {
        let handle = self.inner.running.lock().await.take();
        match handle {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }
}

/// Why the message pump returned.
enum PumpOutcome {
    Shutdown,
    Lost(String),
}

/// Run the connection loop until shutdown or a terminal failure.
async fn run_push_loop(
    inner: Arc<ChannelInner>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), PushError> {
    let result = drive(&inner, &mut shutdown_rx).await;
    inner.set_state(ConnectionState::Disconnected);
    match &result {
        Ok(()) => tracing::info!(hub = %inner.hub, "push channel stopped"),
        Err(e) => tracing::error!(hub = %inner.hub, error = %e, "push channel gave up"),
    }
    result
}

async fn drive(
    inner: &ChannelInner,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<(), PushError> {
    let Some(mut stream) = connect_with_retry(inner, shutdown_rx).await? else {
        return Ok(());
    };
    loop {
        inner.set_state(ConnectionState::Connected);
        tracing::info!(hub = %inner.hub, "push channel connected");

        match pump(inner, &mut stream, shutdown_rx).await {
            PumpOutcome::Shutdown => return Ok(()),
            PumpOutcome::Lost(reason) => {
                tracing::warn!(hub = %inner.hub, reason = %reason, "push connection lost, reconnecting");
            }
        }

        inner.set_state(ConnectionState::Reconnecting);
        match reconnect(inner, shutdown_rx).await? {
            Some(next) => stream = next,
            None => return Ok(()),
        }
    }
}

/// Connect once, racing shutdown. `Ok(None)` means shutdown was signalled.
async fn attempt(
    inner: &ChannelInner,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<Option<HubStream>, PushError> {
    if *shutdown_rx.borrow() {
        return Ok(None);
    }
    let Some(token) = (inner.tokens)() else {
        tracing::info!(hub = %inner.hub, "credential gone, not connecting");
        return Err(PushError::MissingCredential);
    };
    let connection_id = uuid::Uuid::new_v4();
    tracing::debug!(hub = %inner.hub, %connection_id, "connecting");
    tokio::select! {
        result = inner.transport.connect(&inner.hub, &token) => result.map(Some),
        _ = shutdown_rx.changed() => Ok(None),
    }
}

/// Sleep for `delay` unless shutdown is signalled first.
///
/// Returns `false` if shutdown was signalled.
async fn pause(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if delay.is_zero() {
        return !*shutdown_rx.borrow();
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown_rx.changed() => false,
    }
}

/// Startup phase: fixed-delay retry, unbounded, except for 401.
async fn connect_with_retry(
    inner: &ChannelInner,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<Option<HubStream>, PushError> {
    let mut attempts: u64 = 0;
    loop {
        inner.set_state(ConnectionState::Connecting);
        attempts += 1;
        match attempt(inner, shutdown_rx).await {
            Ok(stream) => return Ok(stream),
            Err(PushError::Unauthorized) => {
                tracing::error!(hub = %inner.hub, "hub rejected credential, not retrying");
                return Err(PushError::Unauthorized);
            }
            Err(PushError::MissingCredential) => return Err(PushError::MissingCredential),
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                tracing::warn!(
                    hub = %inner.hub,
                    attempts,
                    retry_in = ?inner.config.retry_delay,
                    error = %e,
                    "push connect failed, will retry"
                );
                if !pause(inner.config.retry_delay, shutdown_rx).await {
                    return Ok(None);
                }
            }
        }
    }
}

/// Reconnect phase: one attempt per configured delay.
async fn reconnect(
    inner: &ChannelInner,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<Option<HubStream>, PushError> {
    for (index, delay) in inner.config.reconnect_delays.iter().enumerate() {
        if !pause(*delay, shutdown_rx).await {
            return Ok(None);
        }
        match attempt(inner, shutdown_rx).await {
            Ok(stream) => return Ok(stream),
            Err(e @ (PushError::Unauthorized | PushError::MissingCredential)) => return Err(e),
            Err(e) => {
                tracing::warn!(hub = %inner.hub, attempt = index + 1, error = %e, "reconnect failed");
            }
        }
    }
    Err(PushError::ReconnectExhausted)
}

/// Forward messages to subscribers until the stream ends or shutdown.
async fn pump(
    inner: &ChannelInner,
    stream: &mut HubStream,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> PumpOutcome {
    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(message)) => inner.dispatch(message),
                Some(Err(e)) => return PumpOutcome::Lost(e.to_string()),
                None => return PumpOutcome::Lost("stream closed".to_owned()),
            },
            _ = shutdown_rx.changed() => return PumpOutcome::Shutdown,
        }
    }
}
