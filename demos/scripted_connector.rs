//! # Scripted Connector Example
//!
//! Shows how to implement the [`Connector`] and [`Transport`] traits with an
//! in-process loopback. This is useful for:
//!
//! - **Testing**: exercise room replay and reconnects without a real server
//! - **Custom backends**: adapt any I/O layer (SSE, long polling, QUIC)
//!
//! The script accepts a connection, pushes a few events, drops the
//! connection, and lets the client reconnect and replay its rooms.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example scripted_connector
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use live_sync_client::{
    ClientConfig, Connector, Frame, Identity, LiveSyncClient, LiveSyncError, Transport,
};
use serde_json::json;
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A channel-based loopback transport
// ─────────────────────────────────────────────────────────────────────

/// Client half of the loopback. `None` on the inbound channel means the
/// server hung up.
struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<Option<String>>,
}

/// Server half of the loopback.
struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<Option<String>>,
}

impl LoopbackServer {
    fn push(&self, event: &str, data: serde_json::Value) {
        if let Ok(text) = Frame::new(event, data).to_text() {
            let _ = self.tx.send(Some(text));
        }
    }

    fn hang_up(&self) {
        let _ = self.tx.send(None);
    }

    /// Drain everything the client has sent so far.
    fn drain(&mut self) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            sent.push(text);
        }
        sent
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), LiveSyncError> {
        self.tx
            .send(message)
            .map_err(|e| LiveSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LiveSyncError>> {
        self.rx.recv().await.flatten().map(Ok)
    }

    async fn close(&mut self) -> Result<(), LiveSyncError> {
        self.rx.close();
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A connector that hands server halves to the demo
// ─────────────────────────────────────────────────────────────────────

struct LoopbackConnector {
    servers: mpsc::UnboundedSender<LoopbackServer>,
    users: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn Transport>, LiveSyncError> {
        if let Ok(mut users) = self.users.lock() {
            users.push(identity.user_id().to_owned());
        }
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        self.servers
            .send(LoopbackServer {
                rx: server_rx,
                tx: server_tx,
            })
            .map_err(|_| LiveSyncError::Connect("demo finished".into()))?;
        Ok(Box::new(LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Drive a session through a drop and a reconnect
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (server_tx, mut servers) = mpsc::unbounded_channel();
    let users = Arc::new(Mutex::new(Vec::new()));
    let connector = LoopbackConnector {
        servers: server_tx,
        users: Arc::clone(&users),
    };

    let config = ClientConfig::default()
        .with_reconnect_delay(Duration::from_millis(50), Duration::from_millis(200));
    let (client, mut notifications) = LiveSyncClient::new(connector, config);

    client.on("shelter_opened", |event| {
        println!("[handler] {} -> {event:?}", event.name());
    });

    client.join_room("disaster-42");
    client.connect(Identity::new("demo-user", "demo-token"))?;

    // First connection: push a few events, then drop it.
    let mut first = servers.recv().await.ok_or("connector closed")?;
    print_notification(&mut notifications).await;
    first.push("user_count", json!(3));
    first.push("urgent_notification", json!({"message": "Evacuate zone 3"}));
    first.push("shelter_opened", json!({"capacity": 120}));
    print_notification(&mut notifications).await;
    println!("first connection saw: {:?}", first.drain());
    first.hang_up();

    // The client retries, reconnects, and replays its rooms.
    let mut second = servers.recv().await.ok_or("connector closed")?;
    print_notification(&mut notifications).await;
    print_notification(&mut notifications).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    println!("second connection saw: {:?}", second.drain());
    println!("online count after reconnect: {}", client.online_count());
    if let Ok(users) = users.lock() {
        println!("connections opened for: {users:?}");
    }

    client.disconnect();
    client.shutdown().await;
    Ok(())
}

async fn print_notification(rx: &mut mpsc::Receiver<live_sync_client::Notification>) {
    if let Some(n) = rx.recv().await {
        println!("[{:?}] {}", n.severity, n.message);
    }
}
