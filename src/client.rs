//! Async client driving a [`Coordinator`] over a [`Transport`].
//!
//! [`MatchmakingClient::start`] spawns a background transport loop that owns
//! both the transport and the coordinator, so every local command and every
//! inbound frame is applied on one task, one at a time. The handle talks to
//! the loop over an unbounded channel; each command waits for the loop's
//! answer so callers still see `InvalidTransition` synchronously.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect("wss://pong.example/ws/main/").await?;
//! let config = MatchmakingConfig::new(7);
//! let (client, mut events, mut foreign) = MatchmakingClient::start(transport, config);
//!
//! client.send_invite(42).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         MatchmakingEvent::LaunchGame { game_id, .. } => { /* open the game view */ }
//!         MatchmakingEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::adapter::{route, Outbox, Routed};
use crate::coordinator::{Coordinator, LocalCommand, DEFAULT_INVITE_TTL};
use crate::error::{MatchmakingError, Result};
use crate::event::{ChannelPresenter, MatchmakingEvent, Presenter};
use crate::protocol::{FriendId, QueueKind, UserId};
use crate::session::SessionSnapshot;
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default capacity of the channel carrying other services' frames.
const DEFAULT_FOREIGN_CHANNEL_CAPACITY: usize = 256;

/// Default period of the invitation expiry sweep.
const DEFAULT_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Lower bound for the expiry sweep period.
const MIN_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`MatchmakingClient`].
///
/// Only `user_id` is required. Durations are read as (fractional) seconds
/// when deserialized, so the config can live in a TOML or JSON file:
///
/// ```toml
/// user_id = 7
/// invite_ttl = 30
/// expiry_sweep_interval = 0.5
/// ```
///
/// # Example
///
/// ```
/// use mmaking_client::client::MatchmakingConfig;
/// use std::time::Duration;
///
/// let config = MatchmakingConfig::new(7)
///     .with_invite_ttl(Some(Duration::from_secs(30)))
///     .with_event_channel_capacity(0);
/// assert_eq!(config.user_id, 7);
/// assert_eq!(config.event_channel_capacity, 1);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct MatchmakingConfig {
    /// Local user id, stamped into every outbound header.
    pub user_id: UserId,
    /// How long an invitation may stay pending before it is cancelled or
    /// declined automatically. `None` keeps invitations forever.
    ///
    /// Defaults to **60 seconds**.
    #[serde(default = "default_invite_ttl", deserialize_with = "optional_seconds")]
    pub invite_ttl: Option<Duration>,
    /// How often pending invitations are checked against `invite_ttl`.
    ///
    /// Defaults to **1 second**. Values below 10 ms are clamped.
    #[serde(
        default = "default_expiry_sweep_interval",
        deserialize_with = "seconds"
    )]
    pub expiry_sweep_interval: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// Events are dropped with a warning when the consumer falls behind;
    /// `Disconnected` is always delivered. Defaults to **256**, minimum 1.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
    /// Capacity of the channel carrying frames for other services.
    ///
    /// Defaults to **256**, minimum 1.
    #[serde(default = "default_foreign_channel_capacity")]
    pub foreign_channel_capacity: usize,
    /// Time the transport loop gets to withdraw and close on
    /// [`MatchmakingClient::shutdown`] before it is aborted.
    ///
    /// Defaults to **1 second**.
    #[serde(default = "default_shutdown_timeout", deserialize_with = "seconds")]
    pub shutdown_timeout: Duration,
}

impl MatchmakingConfig {
    /// Create a configuration for `user_id` with default values.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            invite_ttl: default_invite_ttl(),
            expiry_sweep_interval: DEFAULT_EXPIRY_SWEEP_INTERVAL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            foreign_channel_capacity: DEFAULT_FOREIGN_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the pending invitation lifetime. `None` disables expiry.
    #[must_use]
    pub fn with_invite_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.invite_ttl = ttl;
        self
    }

    /// Set the expiry sweep period. Values below 10 ms are clamped.
    #[must_use]
    pub fn with_expiry_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry_sweep_interval = interval.max(MIN_EXPIRY_SWEEP_INTERVAL);
        self
    }

    /// Set the event channel capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the foreign frame channel capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_foreign_channel_capacity(mut self, capacity: usize) -> Self {
        self.foreign_channel_capacity = capacity.max(1);
        self
    }

    /// Set the graceful shutdown timeout. Zero aborts the loop at once.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

fn default_invite_ttl() -> Option<Duration> {
    Some(DEFAULT_INVITE_TTL)
}

fn default_expiry_sweep_interval() -> Duration {
    DEFAULT_EXPIRY_SWEEP_INTERVAL
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_foreign_channel_capacity() -> usize {
    DEFAULT_FOREIGN_CHANNEL_CAPACITY
}

fn default_shutdown_timeout() -> Duration {
    DEFAULT_SHUTDOWN_TIMEOUT
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

fn optional_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error> {
    Option::<f64>::deserialize(deserializer)?
        .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
        .transpose()
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle and the transport loop.
struct ClientState {
    connected: AtomicBool,
    session: Mutex<SessionSnapshot>,
}

/// Work sent from the handle to the transport loop.
enum Request {
    Command {
        command: LocalCommand,
        reply: oneshot::Sender<Result<()>>,
    },
    /// A frame for another service on the shared socket.
    Raw(String),
}

// ── Client handle ───────────────────────────────────────────────────

/// Async handle to a running matchmaking session.
///
/// Created by [`MatchmakingClient::start`]. Commands are applied by the
/// background loop in arrival order, interleaved with inbound frames.
pub struct MatchmakingClient {
    req_tx: mpsc::UnboundedSender<Request>,
    state: Arc<ClientState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
    user_id: UserId,
}

impl MatchmakingClient {
    /// Start the transport loop.
    ///
    /// Returns the handle, the receiver of [`MatchmakingEvent`]s, and the
    /// receiver of raw frames addressed to other services (chat, presence).
    /// The first event is always [`MatchmakingEvent::Connected`] and the
    /// last [`MatchmakingEvent::Disconnected`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        config: MatchmakingConfig,
    ) -> (
        Self,
        mpsc::Receiver<MatchmakingEvent>,
        mpsc::Receiver<String>,
    ) {
        let (req_tx, req_rx) = mpsc::unbounded_channel::<Request>();
        // Clamp capacities to at least 1 (tokio panics on 0).
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (foreign_tx, foreign_rx) = mpsc::channel(config.foreign_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let coordinator = Coordinator::new(
            config.user_id,
            Outbox::new(),
            ChannelPresenter::new(event_tx.clone()),
        )
        .with_invite_ttl(config.invite_ttl);

        let state = Arc::new(ClientState {
            connected: AtomicBool::new(true),
            session: Mutex::new(coordinator.snapshot()),
        });

        let task = tokio::spawn(transport_loop(
            transport,
            coordinator,
            LoopChannels {
                req_rx,
                event_tx,
                foreign_tx,
                shutdown_rx,
            },
            Arc::clone(&state),
            config.expiry_sweep_interval.max(MIN_EXPIRY_SWEEP_INTERVAL),
        ));

        let client = Self {
            req_tx,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
            user_id: config.user_id,
        };
        (client, event_rx, foreign_rx)
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Run a command on the transport loop and wait for its result.
    ///
    /// # Errors
    ///
    /// The coordinator's error for the command, or
    /// [`MatchmakingError::TransportUnavailable`] once the loop has stopped.
    pub async fn execute(&self, command: LocalCommand) -> Result<()> {
        if !self.is_connected() {
            return Err(MatchmakingError::TransportUnavailable);
        }
        let (reply, answer) = oneshot::channel();
        self.req_tx
            .send(Request::Command { command, reply })
            .map_err(|_| MatchmakingError::TransportUnavailable)?;
        answer
            .await
            .map_err(|_| MatchmakingError::TransportUnavailable)?
    }

    /// Invite `friend` to a game hosted by the local user.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn send_invite(&self, friend: FriendId) -> Result<()> {
        self.execute(LocalCommand::SendInvite(friend)).await
    }

    /// Accept the pending invitation from `friend`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn accept_invite(&self, friend: FriendId) -> Result<()> {
        self.execute(LocalCommand::AcceptIncoming(friend)).await
    }

    /// Decline the pending invitation from `friend`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn decline_invite(&self, friend: FriendId) -> Result<()> {
        self.execute(LocalCommand::DeclineIncoming(friend)).await
    }

    /// Ask the server to start the game with `friend`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn request_start(&self, friend: FriendId) -> Result<()> {
        self.execute(LocalCommand::RequestStart(friend)).await
    }

    /// Cancel the negotiation with `friend`.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn cancel(&self, friend: FriendId) -> Result<()> {
        self.execute(LocalCommand::Cancel(friend)).await
    }

    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn join_queue(&self, kind: QueueKind) -> Result<()> {
        self.execute(LocalCommand::JoinQueue(kind)).await
    }

    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn leave_queue(&self) -> Result<()> {
        self.execute(LocalCommand::LeaveQueue).await
    }

    /// Report that the game finished or was forfeited.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn game_ended(&self) -> Result<()> {
        self.execute(LocalCommand::GameEnded).await
    }

    /// Drop `friend` after they left the friend list.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn forget_friend(&self, friend: FriendId) -> Result<()> {
        self.execute(LocalCommand::ForgetFriend(friend)).await
    }

    /// Report whether the game socket opened.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn report_game_socket(&self, online: bool) -> Result<()> {
        self.execute(LocalCommand::ReportGameSocket { online }).await
    }

    /// Leave the active negotiation or queue, if any.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn withdraw(&self) -> Result<()> {
        self.execute(LocalCommand::Withdraw).await
    }

    /// Put a frame for another service on the shared socket.
    ///
    /// # Errors
    ///
    /// Returns [`MatchmakingError::TransportUnavailable`] once the loop has
    /// stopped.
    pub fn send_raw(&self, text: impl Into<String>) -> Result<()> {
        if !self.is_connected() {
            return Err(MatchmakingError::TransportUnavailable);
        }
        self.req_tx
            .send(Request::Raw(text.into()))
            .map_err(|_| MatchmakingError::TransportUnavailable)
    }

    /// Withdraw from any negotiation or queue, close the transport, and stop
    /// the background task.
    ///
    /// The event receiver yields `Disconnected` and then `None`.
    pub async fn shutdown(&mut self) {
        debug!("MatchmakingClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the transport loop is running.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// The session as of the last step of the transport loop.
    pub async fn current_session(&self) -> SessionSnapshot {
        *self.state.session.lock().await
    }
}

impl std::fmt::Debug for MatchmakingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchmakingClient")
            .field("user_id", &self.user_id)
            .field("connected", &self.is_connected())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for MatchmakingClient {
    fn drop(&mut self) {
        // No executor to drive a graceful withdraw from here; abort only.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

struct LoopChannels {
    req_rx: mpsc::UnboundedReceiver<Request>,
    event_tx: mpsc::Sender<MatchmakingEvent>,
    foreign_tx: mpsc::Sender<String>,
    shutdown_rx: oneshot::Receiver<()>,
}

/// Outcome of one loop iteration.
enum Step {
    Continue,
    /// Answer a command once its frames are on the wire.
    Reply(oneshot::Sender<Result<()>>, Result<()>),
    /// Withdraw, close the transport, and stop.
    Shutdown,
    /// The transport is gone; stop without closing.
    Stop(Option<String>),
}

type LoopCoordinator = Coordinator<Outbox, ChannelPresenter>;

/// Background loop multiplexing commands, inbound frames, and the expiry
/// sweep via `tokio::select!`.
///
/// Exits when the handle shuts down or is dropped, or the transport closes
/// or fails.
async fn transport_loop(
    mut transport: impl Transport,
    mut coordinator: LoopCoordinator,
    channels: LoopChannels,
    state: Arc<ClientState>,
    sweep_interval: Duration,
) {
    let LoopChannels {
        mut req_rx,
        event_tx,
        foreign_tx,
        mut shutdown_rx,
    } = channels;
    debug!(user_id = coordinator.user_id(), "transport loop started");

    coordinator.presenter_mut().publish(MatchmakingEvent::Connected);

    let mut sweep = tokio::time::interval(sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let step = tokio::select! {
            // Branch 1: command or raw frame from the handle
            request = req_rx.recv() => match request {
                Some(Request::Command { command, reply }) => {
                    debug!(?command, "executing command");
                    let result = coordinator.execute(command);
                    Step::Reply(reply, result)
                }
                Some(Request::Raw(text)) => match transport.send(text).await {
                    Ok(()) => Step::Continue,
                    Err(e) => {
                        error!("transport send error: {e}");
                        Step::Stop(Some(format!("transport send error: {e}")))
                    }
                },
                // Every handle is gone.
                None => Step::Shutdown,
            },

            // Branch 2: graceful shutdown
            _ = &mut shutdown_rx => Step::Shutdown,

            // Branch 3: inbound frame
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => {
                    handle_inbound(&mut coordinator, &foreign_tx, text);
                    Step::Continue
                }
                Some(Err(e)) => {
                    error!("transport receive error: {e}");
                    Step::Stop(Some(format!("transport receive error: {e}")))
                }
                None => {
                    debug!("transport closed by server");
                    Step::Stop(None)
                }
            },

            // Branch 4: invitation expiry
            _ = sweep.tick() => {
                let expired = coordinator.expire_invitations(Instant::now());
                if expired > 0 {
                    debug!(expired, "expired pending invitations");
                }
                Step::Continue
            }
        };

        let reason = match step {
            Step::Continue => None,
            Step::Reply(reply, result) => {
                let flushed = flush(&mut transport, &mut coordinator).await;
                *state.session.lock().await = coordinator.snapshot();
                let failed = flushed.as_ref().err().map(ToString::to_string);
                let _ = reply.send(flushed.and(result));
                failed.map(|e| Some(format!("transport send error: {e}")))
            }
            Step::Shutdown => {
                debug!("shutdown signal received");
                if let Err(e) = coordinator.withdraw() {
                    warn!("could not withdraw on shutdown: {e}");
                }
                if let Err(e) = flush(&mut transport, &mut coordinator).await {
                    warn!("could not flush on shutdown: {e}");
                }
                let _ = transport.close().await;
                Some(Some("client shut down".to_string()))
            }
            Step::Stop(reason) => Some(reason),
        };

        // Commands carry their own flush; this covers inbound and sweep steps.
        let reason = match reason {
            None => match flush(&mut transport, &mut coordinator).await {
                Ok(()) => None,
                Err(e) => Some(Some(format!("transport send error: {e}"))),
            },
            stop => stop,
        };

        *state.session.lock().await = coordinator.snapshot();

        if let Some(reason) = reason {
            coordinator.sink_mut().set_open(false);
            emit_disconnected(&event_tx, &state, reason).await;
            break;
        }
    }

    debug!("transport loop exited");
}

fn handle_inbound(coordinator: &mut LoopCoordinator, foreign_tx: &mpsc::Sender<String>, text: String) {
    match route(&text) {
        Ok(Routed::Matchmaking(envelope)) => {
            let outcome = coordinator.dispatch(envelope);
            debug!(?outcome, "dispatched matchmaking envelope");
        }
        Ok(Routed::Foreign { service, raw }) => match foreign_tx.try_send(raw) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(service = %service, "foreign channel full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(service = %service, "foreign channel closed, dropping frame");
            }
        },
        Err(e) => warn!("dropping unroutable frame: {e}"),
    }
}

/// Write every frame the coordinator queued since the last flush.
async fn flush(transport: &mut impl Transport, coordinator: &mut LoopCoordinator) -> Result<()> {
    let frames: Vec<String> = coordinator.sink_mut().drain().collect();
    for frame in frames {
        if let Err(e) = transport.send(frame).await {
            error!("transport send error: {e}");
            return Err(e);
        }
    }
    Ok(())
}

/// Emit [`Disconnected`](MatchmakingEvent::Disconnected) and mark the
/// client disconnected.
///
/// Uses `send().await` rather than `try_send`: this is the last event on
/// the channel and must not be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<MatchmakingEvent>,
    state: &ClientState,
    reason: Option<String>,
) {
    state.connected.store(false, Ordering::Release);
    if event_tx
        .send(MatchmakingEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::session::Mode;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Records sent frames and replays scripted inbound ones.
    struct ScriptedTransport {
        incoming: VecDeque<Option<Result<String>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedTransport {
        fn new(
            incoming: Vec<Option<Result<String>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn first_event_is_connected() {
        let (transport, _sent, _closed) = ScriptedTransport::new(vec![]);
        let (mut client, mut events, _foreign) =
            MatchmakingClient::start(transport, MatchmakingConfig::new(7));
        assert_eq!(events.recv().await.unwrap(), MatchmakingEvent::Connected);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn command_frame_is_written_before_reply() {
        let (transport, sent, _closed) = ScriptedTransport::new(vec![]);
        let (mut client, _events, _foreign) =
            MatchmakingClient::start(transport, MatchmakingConfig::new(7));

        client.join_queue(QueueKind::Random).await.unwrap();
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(client.current_session().await.mode, Mode::InQueueRandom);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_withdraws_and_closes() {
        let (transport, sent, closed) = ScriptedTransport::new(vec![]);
        let (mut client, _events, _foreign) =
            MatchmakingClient::start(transport, MatchmakingConfig::new(7));

        client.join_queue(QueueKind::Tournament).await.unwrap();
        client.shutdown().await;

        let frames = sent.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert!(frames[1].contains(r#""cancel":true"#));
        assert!(closed.load(Ordering::Relaxed));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn commands_fail_after_transport_closes() {
        let (transport, _sent, _closed) = ScriptedTransport::new(vec![None]);
        let (client, mut events, _foreign) =
            MatchmakingClient::start(transport, MatchmakingConfig::new(7));

        let _ = events.recv().await; // Connected
        let event = events.recv().await.unwrap();
        assert_eq!(event, MatchmakingEvent::Disconnected { reason: None });

        let err = client.send_invite(42).await.unwrap_err();
        assert!(matches!(err, MatchmakingError::TransportUnavailable));
        assert!(matches!(
            client.send_raw("{}"),
            Err(MatchmakingError::TransportUnavailable)
        ));
    }

    #[test]
    fn config_defaults() {
        let config = MatchmakingConfig::new(3);
        assert_eq!(config.invite_ttl, Some(Duration::from_secs(60)));
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(1));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.foreign_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_builders_clamp() {
        let config = MatchmakingConfig::new(3)
            .with_expiry_sweep_interval(Duration::ZERO)
            .with_foreign_channel_capacity(0);
        assert_eq!(config.expiry_sweep_interval, Duration::from_millis(10));
        assert_eq!(config.foreign_channel_capacity, 1);
    }

    #[test]
    fn config_reads_fractional_seconds_and_null_ttl() {
        let config: MatchmakingConfig = serde_json::from_str(
            r#"{"user_id": 9, "invite_ttl": null, "shutdown_timeout": 0.25}"#,
        )
        .unwrap();
        assert_eq!(config.user_id, 9);
        assert_eq!(config.invite_ttl, None);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.expiry_sweep_interval, Duration::from_secs(1));
    }

    #[test]
    fn config_rejects_negative_durations() {
        let result =
            serde_json::from_str::<MatchmakingConfig>(r#"{"user_id": 9, "shutdown_timeout": -1}"#);
        assert!(result.is_err());
    }
}
