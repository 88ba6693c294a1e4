//! # Live Sync Client
//!
//! Client-side real-time sync layer for a disaster-response dashboard.
//!
//! The crate keeps one authenticated, long-lived connection per session,
//! recovers from drops with a bounded retry policy, remembers which entity
//! rooms the user joined, and turns inbound server events into typed
//! callbacks and user-facing notifications.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any backend
//! - **WebSocket built-in**: the default `transport-websocket` feature provides [`WebSocketConnector`]
//! - **Bounded reconnect**: at most five automatic attempts with capped exponential backoff
//! - **Room replay**: joined rooms are re-sent exactly once after every reconnect
//! - **Event-driven**: handlers by event name plus a channel of [`Notification`]s
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use live_sync_client::{ClientConfig, EventKind, Identity, LiveSyncClient, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("wss://updates.example.org/socket");
//! let (client, mut notifications) = LiveSyncClient::new(connector, ClientConfig::default());
//!
//! client.on(EventKind::UserCount, |event| println!("{event:?}"));
//! client.connect(Identity::new("user-7", token))?;
//! client.join_room("disaster-42");
//!
//! while let Some(n) = notifications.recv().await {
//!     println!("[{:?}] {}", n.severity, n.message);
//! }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod notification;
pub mod presence;
pub mod protocol;
pub mod reconnect;
pub mod rooms;
pub mod router;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{ClientConfig, ConnectionState, LiveSyncClient, Status};
pub use error::{LiveSyncError, Result};
pub use event::{EventKind, ServerEvent};
pub use notification::{Notification, NotificationDispatcher, Severity};
pub use presence::PresenceTracker;
pub use protocol::{ClientMessage, Frame};
pub use reconnect::{ReconnectPolicy, RetryDecision};
pub use rooms::{RoomAction, RoomRegistry};
pub use router::{EventRouter, Subscription};
pub use session::{AuthState, Identity, SessionGate};
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
