//! # Live Feed Example
//!
//! Demonstrates a complete live sync session over WebSocket:
//!
//! 1. Drive the connection from an authentication signal via `SessionGate`
//! 2. Follow one disaster room
//! 3. Print inbound events through handlers and notifications
//! 4. Sign out and shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start an update server on localhost:5000, then:
//! LIVE_SYNC_TOKEN=... cargo run --example live_feed
//!
//! # Override the server URL, user, or followed disaster:
//! LIVE_SYNC_URL=wss://updates.example.org/socket LIVE_SYNC_USER=user-7 \
//!     LIVE_SYNC_ROOM=disaster-42 cargo run --example live_feed
//! ```

use live_sync_client::{
    AuthState, ClientConfig, EventKind, Identity, LiveSyncClient, ServerEvent, SessionGate,
    Severity, WebSocketConnector,
};
use tokio::sync::watch;

/// Default server URL when `LIVE_SYNC_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:5000/socket";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=live_sync_client=debug` for driver-level output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("LIVE_SYNC_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    let user = std::env::var("LIVE_SYNC_USER").unwrap_or_else(|_| "demo-user".to_string());
    let token = std::env::var("LIVE_SYNC_TOKEN").unwrap_or_default();
    let room = std::env::var("LIVE_SYNC_ROOM").ok();
    tracing::info!("Live updates from {url}");

    // ── Client ──────────────────────────────────────────────────────
    let (client, mut notifications) =
        LiveSyncClient::new(WebSocketConnector::new(url), ClientConfig::default());

    // Cache invalidation hooks. Handlers run on the connection driver and
    // must not block.
    let _disasters = client.on(EventKind::DisasterUpdated, |event| {
        if let ServerEvent::DisasterUpdated(change) = event {
            tracing::info!(
                "disaster {:?} changed ({:?}), refreshing",
                change.entity_id(),
                change.change
            );
        }
    });
    let _presence = client.on(EventKind::UserCount, |event| {
        if let ServerEvent::UserCount(n) = event {
            tracing::info!("{n} user(s) online");
        }
    });

    // Rooms joined before the connection is up are replayed on connect.
    if let Some(room) = &room {
        client.join_room(room);
    }

    // ── Session ─────────────────────────────────────────────────────
    // The gate connects when the session is authenticated and disconnects
    // when it ends.
    let (auth_tx, auth_rx) = watch::channel(AuthState::signed_out());
    let gate = SessionGate::new(client.clone()).spawn(auth_rx);
    auth_tx.send_replace(AuthState::signed_in(Identity::new(user, token)));

    // ── Notification loop ───────────────────────────────────────────
    loop {
        tokio::select! {
            notification = notifications.recv() => {
                let Some(n) = notification else {
                    tracing::info!("Notification channel closed, exiting");
                    break;
                };
                match n.severity {
                    Severity::Urgent => tracing::error!("{} ({:?})", n.message, n.duration),
                    Severity::Warning => tracing::warn!("{}", n.message),
                    Severity::Info | Severity::Success => tracing::info!("{}", n.message),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, signing out");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    auth_tx.send_replace(AuthState::signed_out());
    drop(auth_tx);
    gate.await??;
    client.shutdown().await;
    tracing::info!("Client shut down");

    Ok(())
}
