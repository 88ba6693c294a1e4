#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for live sync client integration tests.
//!
//! Provides a channel-based [`MockTransport`] driven from a [`MockServer`]
//! handle, and a [`ScriptedConnector`] that accepts or rejects connection
//! attempts in a scripted order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use live_sync_client::{
    ClientConfig, ConnectionState, Connector, Frame, Identity, LiveSyncClient, LiveSyncError,
    Notification, Transport,
};
use serde_json::Value;
use tokio::sync::mpsc;

// ── MockTransport ───────────────────────────────────────────────────

enum Inbound {
    Text(String),
    Error(String),
    HangUp,
}

/// Client side of an in-memory connection.
///
/// `recv()` yields whatever the paired [`MockServer`] pushes and returns
/// `None` once the server hangs up or is dropped.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Inbound>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    send_delay: Option<Duration>,
}

/// Server side of an in-memory connection.
#[derive(Clone)]
pub struct MockServer {
    tx: mpsc::UnboundedSender<Inbound>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

/// Create a connected transport/server pair.
pub fn mock_pair() -> (MockTransport, MockServer) {
    let (tx, incoming) = mpsc::unbounded_channel();
    let sent = Arc::new(StdMutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let transport = MockTransport {
        incoming,
        sent: Arc::clone(&sent),
        closed: Arc::clone(&closed),
        send_delay: None,
    };
    (transport, MockServer { tx, sent, closed })
}

impl MockServer {
    /// Push one `{"event", "data"}` frame to the client.
    pub fn push(&self, event: &str, data: Value) {
        let text = Frame::new(event, data).to_text().unwrap();
        self.push_raw(text);
    }

    /// Push a raw text message, which need not be valid JSON.
    pub fn push_raw(&self, text: impl Into<String>) {
        let _ = self.tx.send(Inbound::Text(text.into()));
    }

    /// Make the client's next `recv()` fail with a transport error.
    pub fn fail(&self, reason: &str) {
        let _ = self.tx.send(Inbound::Error(reason.into()));
    }

    /// Close the connection from the server side.
    pub fn hang_up(&self) {
        let _ = self.tx.send(Inbound::HangUp);
    }

    /// Raw messages the client has sent on this connection.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent messages as `(event, data)` pairs.
    pub fn sent_events(&self) -> Vec<(String, Value)> {
        self.sent()
            .iter()
            .map(|text| {
                let frame = Frame::parse(text).expect("client sent an invalid frame");
                (frame.event, frame.data)
            })
            .collect()
    }

    /// Whether the client closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), LiveSyncError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(LiveSyncError::TransportClosed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, LiveSyncError>> {
        match self.incoming.recv().await {
            Some(Inbound::Text(text)) => Some(Ok(text)),
            Some(Inbound::Error(reason)) => Some(Err(LiveSyncError::TransportReceive(reason))),
            Some(Inbound::HangUp) | None => None,
        }
    }

    async fn close(&mut self) -> Result<(), LiveSyncError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── ScriptedConnector ───────────────────────────────────────────────

enum Outcome {
    Accept,
    Reject(String),
}

#[derive(Default)]
struct ConnectorState {
    outcomes: StdMutex<VecDeque<Outcome>>,
    attempts: AtomicUsize,
    identities: StdMutex<Vec<Identity>>,
    servers: StdMutex<Vec<MockServer>>,
    delay: StdMutex<Option<Duration>>,
    send_delay: StdMutex<Option<Duration>>,
}

/// A [`Connector`] that follows a script of outcomes.
///
/// Every attempt is counted and its identity recorded. When the script is
/// exhausted, attempts are rejected. Servers of accepted connections are kept
/// alive so their transports do not close on their own.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    state: Arc<ConnectorState>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the next `n` attempts.
    pub fn accept(self, n: usize) -> Self {
        {
            let mut outcomes = self.state.outcomes.lock().unwrap();
            outcomes.extend((0..n).map(|_| Outcome::Accept));
        }
        self
    }

    /// Reject the next `n` attempts.
    pub fn reject(self, n: usize) -> Self {
        {
            let mut outcomes = self.state.outcomes.lock().unwrap();
            outcomes.extend((0..n).map(|_| Outcome::Reject("scripted rejection".into())));
        }
        self
    }

    /// Delay every attempt before it resolves.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.state.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Make every `send` on accepted connections take `delay`.
    pub fn with_send_delay(self, delay: Duration) -> Self {
        *self.state.send_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.state.identities.lock().unwrap().clone()
    }

    /// Server handle of the `index`-th accepted connection.
    pub fn server(&self, index: usize) -> MockServer {
        self.state.servers.lock().unwrap()[index].clone()
    }

    pub fn accepted(&self) -> usize {
        self.state.servers.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn Transport>, LiveSyncError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        self.state.identities.lock().unwrap().push(identity.clone());

        let delay = *self.state.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self.state.outcomes.lock().unwrap().pop_front();
        match outcome {
            Some(Outcome::Accept) => {
                let (mut transport, server) = mock_pair();
                transport.send_delay = *self.state.send_delay.lock().unwrap();
                self.state.servers.lock().unwrap().push(server);
                Ok(Box::new(transport))
            }
            Some(Outcome::Reject(reason)) => Err(LiveSyncError::Connect(reason)),
            None => Err(LiveSyncError::Connect("connection refused".into())),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Upper bound for every wait in the integration tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Config with millisecond backoff so retry sequences finish quickly.
pub fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .with_reconnect_delay(Duration::from_millis(1), Duration::from_millis(4))
}

pub fn identity(user: &str) -> Identity {
    Identity::new(user, format!("token-for-{user}"))
}

/// Poll `condition` until it holds. Panics after [`WAIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait until the client reports `state`.
pub async fn wait_for_state(client: &LiveSyncClient, state: ConnectionState) {
    let mut status = client.watch_status();
    tokio::time::timeout(WAIT, status.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("state {state:?} not reached, still {:?}", client.state()))
        .expect("status channel closed");
}

/// Receive the next notification. Panics after [`WAIT`].
pub async fn next_notification(rx: &mut mpsc::Receiver<Notification>) -> Notification {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no notification in time")
        .expect("notification channel closed")
}
