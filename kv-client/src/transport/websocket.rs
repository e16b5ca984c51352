//! WebSocket transport built on tokio-tungstenite.
//!
//! Outbound frames are sent as text messages. Inbound text and binary
//! messages are both surfaced as payload bytes; control frames are skipped.

use super::{Transport, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default time allowed for the TCP connect plus WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client side of a WebSocket connection to a relay.
pub struct WebSocketTransport {
    connect_timeout: Duration,
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connect_timeout", &self.connect_timeout)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create an unconnected transport with a custom handshake timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Validate `endpoint` as a `ws://` or `wss://` URL.
    pub fn parse_endpoint(endpoint: &str) -> Result<Url, TransportError> {
        let invalid = |reason: String| TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };
        let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(invalid(format!("unsupported scheme {other:?}"))),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &str) -> Result<(), TransportError> {
        let url = Self::parse_endpoint(endpoint)?;

        let (ws_stream, response) = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        debug!(%url, status = %response.status(), "websocket handshake complete");

        let (sink, stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        let sink = sink.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| {
                self.connected.store(false, Ordering::SeqCst);
                TransportError::SendFailed(e.to_string())
            })
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut stream = self.stream.lock().await;
        let stream = stream.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
            };
            match message {
                Message::Text(text) => return Ok(text.into_bytes()),
                Message::Binary(data) => return Ok(data),
                Message::Close(frame) => {
                    debug!(?frame, "relay closed websocket");
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                // Pongs are queued by tungstenite and flushed on the next send.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            // The peer may already be gone; closing is best effort.
            let _ = sink.close().await;
        }
        self.stream.lock().await.take();
        Ok(())
    }
}
