//! Connection manager for the live sync connection.
//!
//! [`LiveSyncClient`] is a cheap, cloneable handle. It talks to a single
//! background driver task over an unbounded MPSC channel; the driver is the
//! only owner of the transport and performs all I/O and inbound dispatch
//! serially. Every public method returns immediately.
//!
//! The driver cycles through these phases:
//!
//! ```text
//! Idle ──start──▶ Connecting ──ok──▶ Connected ──remote close──▶ Backoff ──▶ Connecting
//!                     │                                              ▲
//!                     └──────────────── failure (attempt ≤ max) ─────┘
//!                     failure (attempt > max) ──▶ Idle (state = Failed)
//! ```
//!
//! A local [`disconnect`](LiveSyncClient::disconnect) takes effect
//! synchronously on the shared session record and bumps its epoch; the
//! driver re-checks the epoch before committing any asynchronous result, so
//! nothing completes or retries after a stop that logically preceded it.
//!
//! # Example
//!
//! ```rust,ignore
//! let (client, mut notifications) =
//!     LiveSyncClient::new(WebSocketConnector::new(url), ClientConfig::default());
//!
//! let updates = client.on(EventKind::DisasterUpdated, |event| {
//!     if let ServerEvent::DisasterUpdated(change) = event {
//!         invalidate_cache(change.entity_id());
//!     }
//! });
//!
//! client.connect(Identity::new("user-7", token))?;
//! client.join_room("disaster-42");
//!
//! while let Some(n) = notifications.recv().await {
//!     show_toast(n.severity, &n.message, n.duration);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::error::{LiveSyncError, Result};
use crate::event::ServerEvent;
use crate::notification::{Notification, NotificationDispatcher};
use crate::presence::PresenceTracker;
use crate::protocol::{ClientMessage, Frame};
use crate::reconnect::{
    ReconnectPolicy, RetryDecision, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
use crate::rooms::{RoomAction, RoomRegistry};
use crate::router::{EventRouter, Subscription};
use crate::session::Identity;
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded notification channel.
const DEFAULT_NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for a single connection attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`LiveSyncClient`].
///
/// # Example
///
/// ```
/// use live_sync_client::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_max_reconnect_attempts(3)
///     .with_reconnect_delay(Duration::from_millis(500), Duration::from_secs(4));
/// assert_eq!(config.max_reconnect_attempts, 3);
/// assert_eq!(config.reconnect_base_delay, Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ceiling on consecutive automatic reconnect attempts. Defaults to **5**.
    pub max_reconnect_attempts: u32,
    /// Delay before the first automatic attempt. Defaults to **1 second**.
    pub reconnect_base_delay: Duration,
    /// Upper bound for the doubling backoff delay. Defaults to **5 seconds**.
    pub reconnect_max_delay: Duration,
    /// A connection attempt that takes longer than this counts as failed.
    /// Defaults to **20 seconds**.
    pub connect_timeout: Duration,
    /// Capacity of the bounded notification channel.
    ///
    /// When the consumer cannot keep up, notifications are dropped (with a
    /// warning logged) so the driver never blocks. Defaults to **64**.
    /// Values below 1 are clamped to 1.
    pub notification_channel_capacity: usize,
    /// Time [`LiveSyncClient::shutdown`] waits for the driver to close the
    /// transport before aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_ATTEMPTS,
            reconnect_base_delay: DEFAULT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_MAX_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            notification_channel_capacity: DEFAULT_NOTIFICATION_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Set the ceiling on consecutive automatic reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, max: u32) -> Self {
        self.max_reconnect_attempts = max;
        self
    }

    /// Set the base and maximum backoff delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    /// Set the timeout for a single connection attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the capacity of the notification channel. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_notification_channel_capacity(mut self, capacity: usize) -> Self {
        self.notification_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.max_reconnect_attempts,
            self.reconnect_base_delay,
            self.reconnect_max_delay,
        )
    }
}

// ── Connection state ────────────────────────────────────────────────

/// Lifecycle state of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// The reconnect ceiling was exceeded. Only a new `connect` leaves this state.
    Failed,
}

impl ConnectionState {
    /// `true` while a connection is open or being attempted.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Reconnecting
        )
    }
}

/// Snapshot published to [`LiveSyncClient::watch_status`] subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status {
    pub state: ConnectionState,
    pub online_count: u64,
}

// ── Shared session record ───────────────────────────────────────────

struct Session {
    state: ConnectionState,
    /// Bumped on every start and stop; stale async completions are discarded.
    epoch: u64,
    /// Bumped on every successful connect; outbound messages are bound to it.
    link: u64,
    rooms: RoomRegistry,
    presence: PresenceTracker,
}

/// State shared between the handle and the driver. The lock is never held
/// across an `.await`.
struct Shared {
    session: Mutex<Session>,
    status_tx: watch::Sender<Status>,
}

impl Shared {
    fn new() -> Self {
        let (status_tx, _) = watch::channel(Status::default());
        Self {
            session: Mutex::new(Session {
                state: ConnectionState::Disconnected,
                epoch: 0,
                link: 0,
                rooms: RoomRegistry::new(),
                presence: PresenceTracker::new(),
            }),
            status_tx,
        }
    }

    fn publish(&self, session: &Session) {
        let next = Status {
            state: session.state,
            online_count: session.presence.get(),
        };
        self.status_tx.send_if_modified(|status| {
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
    }

    // Handle side.

    /// Enter `Connecting` unless a connection is already active.
    fn request_start(&self) -> Option<u64> {
        let mut session = self.session.lock();
        if session.state.is_active() {
            return None;
        }
        session.epoch += 1;
        session.state = ConnectionState::Connecting;
        self.publish(&session);
        Some(session.epoch)
    }

    fn request_stop(&self) {
        let mut session = self.session.lock();
        session.epoch += 1;
        session.state = ConnectionState::Disconnected;
        session.rooms.clear();
        session.presence.reset();
        self.publish(&session);
    }

    fn join(&self, entity_id: &str) -> (RoomAction, u64) {
        let mut session = self.session.lock();
        let connected = session.state == ConnectionState::Connected;
        (session.rooms.join(entity_id, connected), session.link)
    }

    fn leave(&self, entity_id: &str) -> (RoomAction, u64) {
        let mut session = self.session.lock();
        let connected = session.state == ConnectionState::Connected;
        (session.rooms.leave(entity_id, connected), session.link)
    }

    fn current_link(&self) -> Option<u64> {
        let session = self.session.lock();
        (session.state == ConnectionState::Connected).then_some(session.link)
    }

    // Driver side.

    fn is_current(&self, epoch: u64) -> bool {
        self.session.lock().epoch == epoch
    }

    /// Mark the connection as established and return the link id plus the
    /// rooms to replay, or `None` if a stop happened meanwhile.
    fn commit_connected(&self, epoch: u64) -> Option<(u64, Vec<String>)> {
        let mut session = self.session.lock();
        if session.epoch != epoch {
            return None;
        }
        session.link += 1;
        session.state = ConnectionState::Connected;
        self.publish(&session);
        Some((session.link, session.rooms.snapshot()))
    }

    fn commit_state(&self, epoch: u64, state: ConnectionState) -> bool {
        let mut session = self.session.lock();
        if session.epoch != epoch {
            return false;
        }
        session.state = state;
        if state != ConnectionState::Connected {
            session.presence.reset();
        }
        self.publish(&session);
        true
    }

    fn commit_presence(&self, epoch: u64, count: u64) {
        let mut session = self.session.lock();
        if session.epoch == epoch && session.presence.update(count) {
            self.publish(&session);
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Commands from the handle to the driver.
enum Command {
    Start { identity: Identity, epoch: u64 },
    Stop,
    Send { message: ClientMessage, link: u64 },
}

struct ClientInner {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    router: EventRouter,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_timeout: Duration,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        // `Drop` cannot await a graceful close; abort the driver so it does
        // not outlive every handle.
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Handle to the single live connection of a session.
///
/// Created with [`LiveSyncClient::new`]. Clones share the same connection,
/// rooms, and handlers; the driver is aborted when the last clone is dropped.
#[derive(Clone)]
pub struct LiveSyncClient {
    inner: Arc<ClientInner>,
}

impl LiveSyncClient {
    /// Spawn the connection driver and return a handle plus the notification
    /// receiver. The connection starts in [`ConnectionState::Disconnected`];
    /// call [`connect`](Self::connect) or let a
    /// [`SessionGate`](crate::session::SessionGate) drive it.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use = "the notification receiver must be used to receive notifications"]
    pub fn new(
        connector: impl Connector,
        config: ClientConfig,
    ) -> (Self, mpsc::Receiver<Notification>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (notifications, notification_rx) =
            NotificationDispatcher::channel(config.notification_channel_capacity);

        let shared = Arc::new(Shared::new());
        let router = EventRouter::new();

        let driver = Driver {
            connector: Arc::new(connector),
            shared: Arc::clone(&shared),
            router: router.clone(),
            notifications,
            policy: config.reconnect_policy(),
            connect_timeout: config.connect_timeout,
            cmd_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(driver.run());

        let client = Self {
            inner: Arc::new(ClientInner {
                cmd_tx,
                shared,
                router,
                task: Mutex::new(Some(task)),
                shutdown_tx: Mutex::new(Some(shutdown_tx)),
                shutdown_timeout: config.shutdown_timeout,
            }),
        };

        (client, notification_rx)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Open the connection as `identity`.
    ///
    /// A silent no-op while a connection is connecting, connected, or
    /// reconnecting, so it is safe to call from reactive observers. From
    /// `Disconnected` or `Failed` it starts a fresh session with a reset
    /// attempt counter.
    ///
    /// # Errors
    ///
    /// Returns [`LiveSyncError::ClientClosed`] if the client has been shut down.
    pub fn connect(&self, identity: Identity) -> Result<()> {
        let Some(epoch) = self.inner.shared.request_start() else {
            debug!("connect ignored: connection already active");
            return Ok(());
        };
        debug!(user = %identity.user_id(), epoch, "connect requested");
        if self
            .inner
            .cmd_tx
            .send(Command::Start { identity, epoch })
            .is_err()
        {
            self.inner.shared.request_stop();
            return Err(LiveSyncError::ClientClosed);
        }
        Ok(())
    }

    /// Close the connection, forget all rooms, and reset the online count.
    ///
    /// Takes effect immediately: when this returns, `is_connected()` is
    /// `false` and any pending attempt or retry is cancelled. Never triggers a
    /// reconnect. Idempotent.
    pub fn disconnect(&self) {
        debug!("disconnect requested");
        self.inner.shared.request_stop();
        let _ = self.inner.cmd_tx.send(Command::Stop);
    }

    /// Shut down the driver, closing the transport.
    ///
    /// The driver is given `shutdown_timeout` to close gracefully before it
    /// is aborted. Later calls to [`connect`](Self::connect) fail with
    /// [`LiveSyncError::ClientClosed`].
    pub async fn shutdown(&self) {
        debug!("LiveSyncClient: shutdown requested");
        self.inner.shared.request_stop();

        if let Some(tx) = self.inner.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }

        let task = self.inner.task.lock().take();
        if let Some(mut task) = task {
            match tokio::time::timeout(self.inner.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("connection driver terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("connection driver did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("connection driver aborted: {join_err}");
                    }
                }
            }
        }
    }

    // ── Rooms ───────────────────────────────────────────────────────

    /// Join the room for `entity_id`.
    ///
    /// Sent immediately when connected; otherwise remembered and sent after
    /// the next successful connect. Joining twice sends nothing new.
    pub fn join_room(&self, entity_id: &str) {
        if entity_id.is_empty() {
            warn!("join_room called with an empty entity id, ignoring");
            return;
        }
        match self.inner.shared.join(entity_id) {
            (RoomAction::Send, link) => {
                debug!(room = %entity_id, "joining room");
                self.send_on_link(
                    ClientMessage::JoinRoom {
                        entity_id: entity_id.to_owned(),
                    },
                    link,
                );
            }
            (RoomAction::Deferred, _) => {
                debug!(room = %entity_id, "not connected, join deferred until connect");
            }
            (RoomAction::Unchanged, _) => {}
        }
    }

    /// Leave the room for `entity_id`. Offline this only updates local membership.
    pub fn leave_room(&self, entity_id: &str) {
        if let (RoomAction::Send, link) = self.inner.shared.leave(entity_id) {
            debug!(room = %entity_id, "leaving room");
            self.send_on_link(
                ClientMessage::LeaveRoom {
                    entity_id: entity_id.to_owned(),
                },
                link,
            );
        }
    }

    /// Rooms currently joined, in join order.
    pub fn joined_rooms(&self) -> Vec<String> {
        self.inner.shared.session.lock().rooms.snapshot()
    }

    // ── Events ──────────────────────────────────────────────────────

    /// Send an application event, best-effort.
    ///
    /// While not connected the event is dropped with a warning; this is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`LiveSyncError::Serialization`] if the client is connected
    /// and `payload` cannot be converted to JSON. A dropped event is never
    /// serialized.
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, payload: &T) -> Result<()> {
        let Some(link) = self.inner.shared.current_link() else {
            warn!(event = %event, "not connected, dropping outbound event");
            return Ok(());
        };
        let data = serde_json::to_value(payload)?;
        self.send_on_link(
            ClientMessage::Custom {
                event: event.to_owned(),
                data,
            },
            link,
        );
        Ok(())
    }

    /// Register a handler for inbound events named `event`.
    ///
    /// See [`EventRouter::on`].
    pub fn on<F>(&self, event: impl AsRef<str>, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.inner.router.on(event, handler)
    }

    /// Remove a handler. Idempotent.
    pub fn off(&self, subscription: &Subscription) {
        self.inner.router.off(subscription);
    }

    /// The router inbound events are dispatched through.
    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.session.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Last online peer count pushed by the server; zero while not connected.
    pub fn online_count(&self) -> u64 {
        self.inner.shared.session.lock().presence.get()
    }

    /// Subscribe to state and online-count changes.
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.inner.shared.status_tx.subscribe()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn send_on_link(&self, message: ClientMessage, link: u64) {
        if self
            .inner
            .cmd_tx
            .send(Command::Send { message, link })
            .is_err()
        {
            debug!("connection driver stopped, dropping outbound message");
        }
    }
}

impl std::fmt::Debug for LiveSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.inner.shared.session.lock();
        f.debug_struct("LiveSyncClient")
            .field("state", &session.state)
            .field("online_count", &session.presence.get())
            .field("rooms", &session.rooms.len())
            .finish()
    }
}

// ── Driver ──────────────────────────────────────────────────────────

/// Identity and epoch a connection attempt belongs to.
#[derive(Clone)]
struct Ticket {
    identity: Identity,
    epoch: u64,
}

enum Phase {
    Idle,
    Connecting(Ticket),
    Backoff(Ticket, Duration),
    Connected(Ticket, Box<dyn Transport>, u64),
    Exit,
}

struct Driver {
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    router: EventRouter,
    notifications: NotificationDispatcher,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    shutdown_rx: oneshot::Receiver<()>,
}

impl Driver {
    async fn run(mut self) {
        debug!("connection driver started");
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting(ticket) => self.connecting(ticket).await,
                Phase::Backoff(ticket, delay) => self.backoff(ticket, delay).await,
                Phase::Connected(ticket, transport, link) => {
                    self.connected(ticket, transport, link).await
                }
                Phase::Exit => break,
            };
        }
        debug!("connection driver exited");
    }

    async fn idle(&mut self) -> Phase {
        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => return Phase::Exit,
                cmd = self.cmd_rx.recv() => {
                    if let Some(next) = self.offline_command(cmd) {
                        return next;
                    }
                }
            }
        }
    }

    async fn connecting(&mut self, ticket: Ticket) -> Phase {
        if !self.shared.is_current(ticket.epoch) {
            return Phase::Idle;
        }
        debug!(
            user = %ticket.identity.user_id(),
            attempt = self.policy.attempt(),
            "opening connection"
        );

        let connector = Arc::clone(&self.connector);
        let identity = ticket.identity.clone();
        let attempt = tokio::time::timeout(self.connect_timeout, async move {
            connector.connect(&identity).await
        });
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => return Phase::Exit,
                cmd = self.cmd_rx.recv() => {
                    // Returning drops `attempt`, cancelling it.
                    if let Some(next) = self.offline_command(cmd) {
                        return next;
                    }
                }
                result = &mut attempt => {
                    return match result.unwrap_or(Err(LiveSyncError::Timeout)) {
                        Ok(transport) => self.establish(ticket, transport).await,
                        Err(e) => {
                            warn!("connection attempt failed: {e}");
                            self.on_connection_lost(ticket)
                        }
                    };
                }
            }
        }
    }

    async fn backoff(&mut self, ticket: Ticket, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => return Phase::Exit,
                cmd = self.cmd_rx.recv() => {
                    if let Some(next) = self.offline_command(cmd) {
                        return next;
                    }
                }
                _ = &mut sleep => return Phase::Connecting(ticket),
            }
        }
    }

    /// Commit a freshly opened transport and replay subscriptions on it.
    async fn establish(&mut self, ticket: Ticket, mut transport: Box<dyn Transport>) -> Phase {
        let Some((link, rooms)) = self.shared.commit_connected(ticket.epoch) else {
            debug!("connection completed after stop, discarding");
            close_quietly(transport.as_mut()).await;
            return Phase::Idle;
        };
        self.policy.reset();
        info!(user = %ticket.identity.user_id(), rooms = rooms.len(), "live connection established");

        let replay = std::iter::once(ClientMessage::JoinGeneral)
            .chain(rooms.into_iter().map(|entity_id| ClientMessage::JoinRoom { entity_id }));
        for message in replay {
            if let Err(e) = send_message(transport.as_mut(), message).await {
                error!("failed to replay subscriptions: {e}");
                return self.on_connection_lost(ticket);
            }
        }

        // A stop may have landed while the replay was in flight.
        if !self.shared.is_current(ticket.epoch) {
            debug!("stopped during subscription replay, discarding connection");
            close_quietly(transport.as_mut()).await;
            return Phase::Idle;
        }
        self.notifications.publish(Notification::connected());
        Phase::Connected(ticket, transport, link)
    }

    async fn connected(
        &mut self,
        ticket: Ticket,
        mut transport: Box<dyn Transport>,
        link: u64,
    ) -> Phase {
        loop {
            tokio::select! {
                _ = &mut self.shutdown_rx => {
                    debug!("shutdown signal received");
                    close_quietly(transport.as_mut()).await;
                    return Phase::Exit;
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    None => {
                        debug!("command channel closed, closing transport");
                        close_quietly(transport.as_mut()).await;
                        return Phase::Exit;
                    }
                    Some(Command::Stop) => {
                        debug!("local stop, closing transport");
                        close_quietly(transport.as_mut()).await;
                        return Phase::Idle;
                    }
                    Some(Command::Start { identity, epoch }) => {
                        if let Some(next) = self.fresh_start(identity, epoch) {
                            close_quietly(transport.as_mut()).await;
                            return next;
                        }
                    }
                    Some(Command::Send { message, link: bound_to }) => {
                        if bound_to != link {
                            debug!(event = %message.event_name(), "message bound to an earlier connection, dropping");
                            continue;
                        }
                        match send_message(transport.as_mut(), message).await {
                            Ok(()) => {}
                            Err(LiveSyncError::Serialization(e)) => {
                                error!("failed to serialize outbound frame: {e}");
                            }
                            Err(e) => {
                                error!("transport send error: {e}");
                                return self.on_connection_lost(ticket);
                            }
                        }
                    }
                },

                incoming = transport.recv() => match incoming {
                    Some(Ok(text)) => self.dispatch(ticket.epoch, &text),
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return self.on_connection_lost(ticket);
                    }
                    None => {
                        info!("connection closed by remote");
                        return self.on_connection_lost(ticket);
                    }
                },
            }
        }
    }

    /// Handle a command while no transport is open. `None` means stay in the
    /// current phase.
    fn offline_command(&mut self, cmd: Option<Command>) -> Option<Phase> {
        match cmd {
            None => {
                debug!("command channel closed");
                Some(Phase::Exit)
            }
            Some(Command::Start { identity, epoch }) => self.fresh_start(identity, epoch),
            Some(Command::Stop) => Some(Phase::Idle),
            Some(Command::Send { message, .. }) => {
                debug!(event = %message.event_name(), "not connected, dropping outbound message");
                None
            }
        }
    }

    fn fresh_start(&mut self, identity: Identity, epoch: u64) -> Option<Phase> {
        if !self.shared.is_current(epoch) {
            debug!(epoch, "ignoring superseded start");
            return None;
        }
        self.policy.reset();
        Some(Phase::Connecting(Ticket { identity, epoch }))
    }

    /// Feed a failed attempt or a remote close to the reconnect policy.
    fn on_connection_lost(&mut self, ticket: Ticket) -> Phase {
        if !self.shared.is_current(ticket.epoch) {
            return Phase::Idle;
        }
        match self.policy.record_failure() {
            RetryDecision::Retry {
                attempt,
                max,
                delay,
            } => {
                if !self
                    .shared
                    .commit_state(ticket.epoch, ConnectionState::Reconnecting)
                {
                    return Phase::Idle;
                }
                warn!(attempt, max, delay = ?delay, "live connection lost, retrying");
                self.notifications
                    .publish(Notification::retrying(attempt, max));
                Phase::Backoff(ticket, delay)
            }
            RetryDecision::GiveUp { attempts } => {
                if self
                    .shared
                    .commit_state(ticket.epoch, ConnectionState::Failed)
                {
                    error!(attempts, "reconnect ceiling exceeded, giving up");
                    self.notifications.publish(Notification::gave_up());
                }
                Phase::Idle
            }
        }
    }

    /// Parse one inbound text message and fan it out.
    fn dispatch(&mut self, epoch: u64, text: &str) {
        if !self.shared.is_current(epoch) {
            return;
        }
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to parse inbound frame: {e}; raw: {text}");
                return;
            }
        };
        let event = ServerEvent::from_frame(frame);
        debug!(event = %event.name(), "inbound event");

        if let ServerEvent::UserCount(count) = &event {
            self.shared.commit_presence(epoch, *count);
        }
        self.notifications.dispatch(&event);
        self.router.emit(&event);
    }
}

async fn send_message(transport: &mut dyn Transport, message: ClientMessage) -> Result<()> {
    debug!(event = %message.event_name(), "sending client message");
    let text = message.into_frame().to_text()?;
    transport.send(text).await
}

async fn close_quietly(transport: &mut dyn Transport) {
    if let Err(e) = transport.close().await {
        debug!("transport close failed: {e}");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A connector whose attempts never complete.
    struct HangingConnector {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self, _identity: &Identity) -> Result<Box<dyn Transport>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn hanging() -> (HangingConnector, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            HangingConnector {
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }

    fn identity() -> Identity {
        Identity::new("user-1", "token")
    }

    #[test]
    fn config_clamps_channel_capacity() {
        let config = ClientConfig::default().with_notification_channel_capacity(0);
        assert_eq!(config.notification_channel_capacity, 1);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(1000));
    }

    #[test]
    fn active_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::Failed.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
    }

    #[test]
    fn stale_epoch_cannot_commit() {
        let shared = Shared::new();
        let epoch = shared.request_start().unwrap();
        shared.request_stop();
        assert!(shared.commit_connected(epoch).is_none());
        assert!(!shared.commit_state(epoch, ConnectionState::Reconnecting));
        shared.commit_presence(epoch, 9);
        assert_eq!(shared.session.lock().presence.get(), 0);
        assert_eq!(shared.session.lock().state, ConnectionState::Disconnected);
    }

    #[test]
    fn join_before_commit_is_replayed_join_after_is_sent() {
        let shared = Shared::new();
        let epoch = shared.request_start().unwrap();
        assert_eq!(shared.join("r1").0, RoomAction::Deferred);

        let (link, replay) = shared.commit_connected(epoch).unwrap();
        assert_eq!(replay, vec!["r1".to_string()]);
        assert_eq!(shared.join("r2"), (RoomAction::Send, link));
        assert_eq!(shared.join("r1").0, RoomAction::Unchanged);
    }

    #[tokio::test]
    async fn repeated_connect_opens_one_attempt() {
        let (connector, attempts) = hanging();
        let (client, _notifications) = LiveSyncClient::new(connector, ClientConfig::default());

        for _ in 0..5 {
            client.connect(identity()).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), ConnectionState::Connecting);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_cancels_pending_attempt() {
        let (connector, attempts) = hanging();
        let (client, _notifications) = LiveSyncClient::new(connector, ClientConfig::default());

        client.connect(identity()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // A fresh connect starts a new attempt rather than resuming the old one.
        client.connect(identity()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn connect_after_shutdown_reports_closed() {
        let (connector, _attempts) = hanging();
        let (client, _notifications) = LiveSyncClient::new(connector, ClientConfig::default());
        client.shutdown().await;

        let err = client.connect(identity()).unwrap_err();
        assert!(matches!(err, LiveSyncError::ClientClosed));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn timeout_counts_as_failed_attempt() {
        let (connector, attempts) = hanging();
        let config = ClientConfig::default()
            .with_max_reconnect_attempts(1)
            .with_connect_timeout(Duration::from_millis(5))
            .with_reconnect_delay(Duration::from_millis(1), Duration::from_millis(1));
        let (client, mut notifications) = LiveSyncClient::new(connector, config);

        client.connect(identity()).unwrap();
        let mut status = client.watch_status();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.state == ConnectionState::Failed),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        let first = notifications.recv().await.unwrap();
        assert!(first.message.contains("(1/1)"));
        let last = notifications.recv().await.unwrap();
        assert_eq!(last, Notification::gave_up());
        client.shutdown().await;
    }
}
