//! Transport implementations for the live sync connection.
//!
//! This module provides concrete [`Transport`](crate::Transport) and
//! [`Connector`](crate::Connector) implementations behind feature gates:
//!
//! | Feature                | Types                                         |
//! |------------------------|-----------------------------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`], [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! use live_sync_client::{ClientConfig, Identity, LiveSyncClient, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("wss://updates.example.org/socket");
//! let (client, mut notifications) = LiveSyncClient::new(connector, ClientConfig::default());
//! client.connect(Identity::new("user-7", token))?;
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
