//! Error types for the live sync client.

use thiserror::Error;

/// Errors that can occur when using the live sync client.
///
/// Transient connectivity failures are handled inside the client and surface
/// as [`Notification`](crate::notification::Notification)s, never as values of
/// this type returned to callers.
#[derive(Debug, Error)]
pub enum LiveSyncError {
    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was already closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// A connection attempt failed before a transport was established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The identity could not be attached to the connection handshake.
    #[error("invalid handshake identity: {0}")]
    Handshake(String),

    /// Failed to serialize or deserialize a wire frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// The background connection driver is no longer running.
    #[error("client has been shut down")]
    ClientClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for live sync client operations.
pub type Result<T> = std::result::Result<T, LiveSyncError>;
