//! In-process relay for tests and single-process demos.
//!
//! [`MemoryHub`] plays the relay: every frame a peer sends is delivered to
//! the other peers connected to the same endpoint. The endpoint string is
//! just a room name here.

use super::{Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

type PeerId = u64;

#[derive(Debug)]
struct Peer {
    endpoint: String,
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Debug, Default)]
struct HubInner {
    next_peer: PeerId,
    peers: HashMap<PeerId, Peer>,
    delivered: Vec<(String, String)>,
    reflect_to_sender: bool,
    refuse: Option<String>,
}

/// Shared relay for [`MemoryTransport`]s.
#[derive(Debug, Default)]
pub struct MemoryHub {
    inner: Mutex<HubInner>,
}

impl MemoryHub {
    /// Create a hub that forwards frames to every peer except the sender.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a hub that also returns each frame to its sender, the way
    /// broadcast relays often do.
    pub fn reflecting() -> Arc<Self> {
        let hub = Self::default();
        hub.inner.lock().reflect_to_sender = true;
        Arc::new(hub)
    }

    /// A new, unconnected transport attached to this hub.
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            hub: Arc::clone(self),
            peer: Mutex::new(None),
            receiver: tokio::sync::Mutex::new(None),
        }
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.inner.lock().peers.len()
    }

    /// Every frame sent through the hub as `(endpoint, frame)`, in order.
    pub fn frames(&self) -> Vec<(String, String)> {
        self.inner.lock().delivered.clone()
    }

    /// Reject new connections with `reason` until [`MemoryHub::accept`].
    pub fn refuse(&self, reason: &str) {
        self.inner.lock().refuse = Some(reason.to_string());
    }

    /// Accept connections again.
    pub fn accept(&self) {
        self.inner.lock().refuse = None;
    }

    /// Drop every peer, as a relay restart would.
    pub fn disconnect_all(&self) {
        self.inner.lock().peers.clear();
    }

    fn register(
        &self,
        endpoint: &str,
        sender: mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<PeerId, TransportError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.refuse {
            return Err(TransportError::ConnectionFailed(reason.clone()));
        }
        inner.next_peer += 1;
        let id = inner.next_peer;
        inner.peers.insert(
            id,
            Peer {
                endpoint: endpoint.to_string(),
                sender,
            },
        );
        Ok(id)
    }

    fn unregister(&self, id: PeerId) {
        self.inner.lock().peers.remove(&id);
    }

    fn broadcast(&self, from: PeerId, frame: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        let endpoint = match inner.peers.get(&from) {
            Some(peer) => peer.endpoint.clone(),
            None => return Err(TransportError::ConnectionClosed),
        };
        let reflect = inner.reflect_to_sender;
        for (id, peer) in &inner.peers {
            if peer.endpoint != endpoint || (*id == from && !reflect) {
                continue;
            }
            // A peer whose receiver is gone is being torn down; skip it.
            let _ = peer.sender.send(frame.as_bytes().to_vec());
        }
        trace!(peer = from, %endpoint, "hub forwarded frame");
        inner.delivered.push((endpoint, frame.to_string()));
        Ok(())
    }
}

/// Transport endpoint on a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryTransport {
    hub: Arc<MemoryHub>,
    peer: Mutex<Option<PeerId>>,
    receiver: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, endpoint: &str) -> Result<(), TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.hub.register(endpoint, sender)?;
        if let Some(previous) = self.peer.lock().replace(id) {
            self.hub.unregister(previous);
        }
        *self.receiver.lock().await = Some(receiver);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let id = (*self.peer.lock()).ok_or(TransportError::NotConnected)?;
        self.hub.broadcast(id, frame)
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        let mut receiver = self.receiver.lock().await;
        let receiver = receiver.as_mut().ok_or(TransportError::NotConnected)?;
        receiver
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        match *self.peer.lock() {
            Some(id) => self.hub.inner.lock().peers.contains_key(&id),
            None => false,
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if let Some(id) = self.peer.lock().take() {
            self.hub.unregister(id);
        }
        Ok(())
    }
}
