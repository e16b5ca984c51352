//! Relay server: accepts WebSocket peers and fans frames out per room.

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

/// Operational counters for the relay.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Connections accepted at the TCP level.
    pub connections_total: AtomicU64,
    /// Connections that failed the WebSocket handshake.
    pub handshake_failures: AtomicU64,
    /// Frames received from peers.
    pub frames_received: AtomicU64,
    /// Frame copies queued to peers.
    pub frames_forwarded: AtomicU64,
    /// Payload bytes received.
    pub bytes_received: AtomicU64,
}

/// A connected peer.
#[derive(Debug)]
struct Peer {
    room: String,
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Message>,
}

/// WebSocket fan-out relay.
pub struct Relay {
    config: ServerConfig,
    metrics: RelayMetrics,
    peers: DashMap<u64, Peer>,
    next_peer: AtomicU64,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl Relay {
    /// Create a relay with the given config.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            metrics: RelayMetrics::default(),
            peers: DashMap::new(),
            next_peer: AtomicU64::new(1),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Number of connected peers across all rooms.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of peers connected to `room` (a request path such as `/office`).
    pub fn room_size(&self, room: &str) -> usize {
        self.peers.iter().filter(|peer| peer.room == room).count()
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        Ok(TcpListener::bind(&self.config.bind_address).await?)
    }

    /// Accept peers on `listener` until `shutdown` resolves.
    ///
    /// Peers already connected keep their tasks until they disconnect.
    pub async fn serve<S>(self: Arc<Self>, listener: TcpListener, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!("Relay accepting on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Relay shutting down ({} peers connected)", self.peer_count());
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);

                    let relay = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = relay.handle_connection(stream, addr).await {
                            tracing::debug!("Connection from {} ended with error: {}", addr, e);
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);

        let mut room = String::new();
        let capture_room = |request: &Request,
                            response: Response|
         -> std::result::Result<Response, ErrorResponse> {
            room = request.uri().path().to_string();
            Ok(response)
        };

        let handshake = timeout(
            self.config.handshake_timeout(),
            accept_hdr_async_with_config(stream, capture_room, Some(ws_config)),
        )
        .await;
        let ws_stream = match handshake {
            Ok(Ok(ws_stream)) => ws_stream,
            Ok(Err(e)) => {
                self.metrics.handshake_failures.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::Handshake(e.to_string()));
            }
            Err(_) => {
                self.metrics.handshake_failures.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::Handshake("timed out".to_string()));
            }
        };

        let (mut sink, mut source) = ws_stream.split();
        let (outbound, mut queue) = mpsc::unbounded_channel();
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        self.peers.insert(
            id,
            Peer {
                room: room.clone(),
                addr,
                outbound,
            },
        );
        tracing::info!(
            "Peer {} joined room {} from {} (room size: {})",
            id,
            room,
            addr,
            self.room_size(&room)
        );

        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        while let Some(message) = source.next().await {
            match message {
                Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                    self.metrics.frames_received.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .bytes_received
                        .fetch_add(message.len() as u64, Ordering::Relaxed);
                    let delivered = self.broadcast(id, &room, message);
                    tracing::debug!("Peer {} frame delivered to {} peers", id, delivered);
                }
                Ok(Message::Close(_)) => break,
                // Pings are answered by the protocol layer.
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Peer {} read error: {}", id, e);
                    break;
                }
            }
        }

        // Dropping the sender ends the writer after it flushes queued frames.
        if let Some((_, peer)) = self.peers.remove(&id) {
            tracing::info!("Peer {} left room {} ({})", id, peer.room, peer.addr);
        }
        let _ = writer.await;
        Ok(())
    }

    /// Queue `message` to every peer in `room` except the sender (unless
    /// reflecting). Returns the number of peers it was queued to.
    fn broadcast(&self, sender: u64, room: &str, message: Message) -> usize {
        let mut delivered = 0;
        for peer in self.peers.iter() {
            if peer.room != room {
                continue;
            }
            if *peer.key() == sender && !self.config.reflect_to_sender {
                continue;
            }
            if peer.outbound.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        self.metrics
            .frames_forwarded
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(reflect: bool) -> Relay {
        Relay::new(ServerConfig {
            reflect_to_sender: reflect,
            ..Default::default()
        })
    }

    fn join(relay: &Relay, room: &str) -> (u64, mpsc::UnboundedReceiver<Message>) {
        let (outbound, queue) = mpsc::unbounded_channel();
        let id = relay.next_peer.fetch_add(1, Ordering::Relaxed);
        relay.peers.insert(
            id,
            Peer {
                room: room.to_string(),
                addr: "127.0.0.1:1".parse().unwrap(),
                outbound,
            },
        );
        (id, queue)
    }

    // ===========================================
    // Fan-out
    // ===========================================

    #[test]
    fn broadcast_skips_sender_and_other_rooms() {
        let relay = relay(false);
        let (a, mut a_rx) = join(&relay, "/office");
        let (_b, mut b_rx) = join(&relay, "/office");
        let (_c, mut c_rx) = join(&relay, "/home");

        let delivered = relay.broadcast(a, "/office", Message::Text("hi".into()));

        assert_eq!(delivered, 1);
        assert_eq!(b_rx.try_recv().unwrap(), Message::Text("hi".into()));
        assert!(a_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());
        assert_eq!(relay.metrics().frames_forwarded.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn broadcast_reflects_when_configured() {
        let relay = relay(true);
        let (a, mut a_rx) = join(&relay, "/");
        let (_b, mut b_rx) = join(&relay, "/");

        assert_eq!(relay.broadcast(a, "/", Message::Text("x".into())), 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }

    #[test]
    fn closed_peers_are_not_counted() {
        let relay = relay(false);
        let (a, _a_rx) = join(&relay, "/");
        let (_b, b_rx) = join(&relay, "/");
        drop(b_rx);

        assert_eq!(relay.broadcast(a, "/", Message::Binary(vec![1])), 0);
    }

    #[test]
    fn room_sizes() {
        let relay = relay(false);
        let _a = join(&relay, "/one");
        let _b = join(&relay, "/one");
        let _c = join(&relay, "/two");

        assert_eq!(relay.peer_count(), 3);
        assert_eq!(relay.room_size("/one"), 2);
        assert_eq!(relay.room_size("/three"), 0);
    }
}
