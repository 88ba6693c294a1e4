//! Transport abstraction for the live sync connection.
//!
//! The [`Transport`] trait is a bidirectional text message channel between
//! the client and server. Every message is one JSON envelope (see
//! [`Frame`](crate::protocol::Frame)); transports handle framing internally.
//!
//! Unlike a one-shot client, the connection driver must be able to open a
//! fresh transport on every reconnect, so connection setup lives behind the
//! separate [`Connector`] trait. The [`Identity`] is handed to the connector
//! and attached as connect-time metadata only; it is never sent later as a
//! message.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use live_sync_client::error::LiveSyncError;
//! use live_sync_client::session::Identity;
//! use live_sync_client::transport::{Connector, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), LiveSyncError> {
//!         // Send the JSON text message over your transport
//!         Ok(())
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, LiveSyncError>> {
//!         // Receive the next JSON text message.
//!         // Return None when the server closed the connection.
//!         None
//!     }
//!
//!     async fn close(&mut self) -> Result<(), LiveSyncError> {
//!         Ok(())
//!     }
//! }
//!
//! struct MyConnector;
//!
//! #[async_trait]
//! impl Connector for MyConnector {
//!     async fn connect(&self, identity: &Identity) -> Result<Box<dyn Transport>, LiveSyncError> {
//!         // Open the connection with `identity` in the handshake.
//!         Ok(Box::new(MyTransport {}))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::LiveSyncError;
use crate::session::Identity;

/// A bidirectional text message transport.
///
/// # Object Safety
///
/// This trait is object-safe; the connection driver holds a
/// `Box<dyn Transport>` produced by a [`Connector`].
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling
/// it again must not lose data. Channel-based implementations (e.g. wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`LiveSyncError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), LiveSyncError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred; the connection is treated as lost
    /// - `None`: the connection was closed by the remote side
    async fn recv(&mut self) -> Option<Result<String, LiveSyncError>>;

    /// Close the transport locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), LiveSyncError>;
}

/// Opens transports on behalf of the connection driver.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection authenticated as `identity`.
    ///
    /// # Errors
    ///
    /// Any error is treated as a failed attempt and fed to the
    /// [`ReconnectPolicy`](crate::reconnect::ReconnectPolicy).
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn Transport>, LiveSyncError>;
}
