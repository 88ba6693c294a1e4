//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketConnector`] opens a fresh [`WebSocketTransport`] for every
//! connection attempt, attaching the caller's [`Identity`] to the HTTP
//! upgrade request as `Authorization: Bearer <credential>` and
//! `X-User-Id: <user id>`. Both `ws://` and `wss://` URLs are supported; TLS
//! is handled transparently via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), live_sync_client::LiveSyncError> {
//! use live_sync_client::{Connector, Identity, Transport, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("ws://localhost:5000/socket");
//! let mut transport = connector.connect(&Identity::new("user-1", "token")).await?;
//! transport.send(r#"{"event":"join_general","data":null}"#.to_string()).await?;
//!
//! if let Some(Ok(msg)) = transport.recv().await {
//!     println!("received: {msg}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::LiveSyncError;
use crate::session::Identity;
use crate::transport::{Connector, Transport};

/// Header carrying the user id during the handshake.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Connector ───────────────────────────────────────────────────────

/// A [`Connector`] that dials a fixed WebSocket URL.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, identity: &Identity) -> Result<Box<dyn Transport>, LiveSyncError> {
        let transport = WebSocketTransport::connect(&self.url, identity).await?;
        Ok(Box::new(transport))
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any messages,
/// making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to `url`, authenticated as `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`LiveSyncError::Handshake`] if the URL or identity cannot be
    /// turned into a valid upgrade request, and [`LiveSyncError::Io`] if the
    /// connection cannot be established. When the underlying error is an I/O
    /// error its [`ErrorKind`](std::io::ErrorKind) is preserved.
    pub async fn connect(url: &str, identity: &Identity) -> Result<Self, LiveSyncError> {
        tracing::debug!(url = %url, user = %identity.user_id(), "connecting to WebSocket server");

        let request = handshake_request(url, identity)?;
        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| {
                let kind = match &e {
                    tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                    _ => std::io::ErrorKind::Other,
                };
                LiveSyncError::Io(std::io::Error::new(kind, e))
            })?;

        tracing::info!(url = %url, "WebSocket connection established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }
}

/// Build the upgrade request with the identity attached as headers.
fn handshake_request(
    url: &str,
    identity: &Identity,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, LiveSyncError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| LiveSyncError::Handshake(format!("invalid url: {e}")))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", identity.credential()))
        .map_err(|_| LiveSyncError::Handshake("credential is not a valid header value".into()))?;
    let user_id = HeaderValue::from_str(identity.user_id())
        .map_err(|_| LiveSyncError::Handshake("user id is not a valid header value".into()))?;

    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(HeaderName::from_static(USER_ID_HEADER), user_id);
    Ok(request)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), LiveSyncError> {
        if self.closed {
            return Err(LiveSyncError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| LiveSyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LiveSyncError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(LiveSyncError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // tungstenite answers pings itself.
                }
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {
                    tracing::debug!("received raw WebSocket frame, skipping");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), LiveSyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| LiveSyncError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    fn identity() -> Identity {
        Identity::new("user-42", "secret-token")
    }

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[test]
    fn handshake_carries_identity_headers() {
        let request = handshake_request("ws://localhost:5000/socket", &identity()).unwrap();
        let headers = request.headers();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer secret-token");
        assert_eq!(headers.get(USER_ID_HEADER).unwrap(), "user-42");
    }

    #[test]
    fn handshake_rejects_control_characters_in_credential() {
        let bad = Identity::new("user-1", "line\nbreak");
        let err = handshake_request("ws://localhost:5000/socket", &bad).unwrap_err();
        assert!(matches!(err, LiveSyncError::Handshake(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let result = WebSocketTransport::connect("not-a-valid-url", &identity()).await;
        assert!(matches!(
            result.unwrap_err(),
            LiveSyncError::Handshake(_) | LiveSyncError::Io(_)
        ));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let result = WebSocketConnector::new("ws://127.0.0.1:1")
            .connect(&identity())
            .await;
        assert!(matches!(result.err().unwrap(), LiveSyncError::Io(_)));
    }

    // ── Mock-server helpers ──────────────────────────────────────────────

    /// Start a local WebSocket server that records the handshake headers,
    /// runs `handler` on the accepted connection, and returns the URL.
    async fn start_mock_server<F, Fut>(handler: F) -> (String, Arc<StdMutex<Vec<(String, String)>>>)
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_hdr_async(tcp, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let mut seen = seen_in.lock().unwrap();
                for (name, value) in req.headers() {
                    seen.push((
                        name.as_str().to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    ));
                }
                Ok(resp)
            })
            .await
            .unwrap();
            handler(ws).await;
        });

        (format!("ws://{addr}"), seen)
    }

    #[tokio::test]
    async fn server_sees_identity_at_connect_time() {
        let (url, seen) = start_mock_server(|mut ws| async move {
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new(url).connect(&identity()).await.unwrap();
        assert!(transport.recv().await.is_none());

        let seen = seen.lock().unwrap();
        assert!(seen
            .iter()
            .any(|(k, v)| k == "authorization" && v == "Bearer secret-token"));
        assert!(seen.iter().any(|(k, v)| k == USER_ID_HEADER && v == "user-42"));
    }

    #[tokio::test]
    async fn recv_receives_text_and_skips_binary() {
        let (url, _) = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into())).await.unwrap();
            ws.send(Message::Text(r#"{"event":"user_count","data":3}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, &identity()).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"event":"user_count","data":3}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let (url, _) =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url, &identity()).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, LiveSyncError::TransportClosed));
    }

    #[tokio::test]
    async fn send_round_trip() {
        let (url, _) = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url, &identity()).await.unwrap();
        transport
            .send(r#"{"event":"join_general","data":null}"#.to_string())
            .await
            .unwrap();

        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"event":"join_general","data":null}"#);
    }
}
