//! Relay behaviour over real sockets, using the client's WebSocket transport.

use serde_json::json;
use sharedkv_client::{
    ConnectivitySupervisor, MemoryPersistence, SharedKv, SupervisorConfig, Transport,
    WebSocketTransport,
};
use sharedkv_core::Phase;
use sharedkv_relay::{Relay, ServerConfig};
use sharedkv_types::Snapshot;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

struct Running {
    relay: Arc<Relay>,
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
}

impl Running {
    async fn start(reflect_to_sender: bool) -> Self {
        let relay = Arc::new(Relay::new(ServerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            reflect_to_sender,
            ..Default::default()
        }));
        let listener = relay.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel();
        tokio::spawn(relay.clone().serve(listener, async {
            let _ = stopped.await;
        }));
        Self {
            relay,
            addr,
            stop: Some(stop),
        }
    }

    fn url(&self, room: &str) -> String {
        format!("ws://{}{}", self.addr, room)
    }

    async fn connect(&self, room: &str) -> WebSocketTransport {
        let before = self.relay.room_size(room);
        let transport = WebSocketTransport::new();
        transport.connect(&self.url(room)).await.unwrap();
        self.wait_room(room, before + 1).await;
        transport
    }

    async fn wait_room(&self, room: &str, size: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.relay.room_size(room) != size {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("room size not reached");
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn recv_text(transport: &WebSocketTransport) -> String {
    let bytes = tokio::time::timeout(Duration::from_secs(5), transport.recv())
        .await
        .expect("no frame")
        .unwrap();
    String::from_utf8(bytes).unwrap()
}

async fn nothing_arrives(transport: &WebSocketTransport) -> bool {
    tokio::time::timeout(Duration::from_millis(200), transport.recv())
        .await
        .is_err()
}

// ===========================================
// Fan-out
// ===========================================

#[tokio::test]
async fn frames_reach_other_peers_in_the_room_only() {
    let running = Running::start(false).await;
    let a = running.connect("/office").await;
    let b = running.connect("/office").await;
    let c = running.connect("/home").await;

    a.send(r#"{"key":"k"}"#).await.unwrap();

    assert_eq!(recv_text(&b).await, r#"{"key":"k"}"#);
    assert!(nothing_arrives(&a).await);
    assert!(nothing_arrives(&c).await);

    let metrics = running.relay.metrics();
    assert_eq!(metrics.frames_received.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.frames_forwarded.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn reflecting_relay_echoes_to_sender() {
    let running = Running::start(true).await;
    let a = running.connect("/").await;
    let b = running.connect("/").await;

    a.send("ping").await.unwrap();

    assert_eq!(recv_text(&a).await, "ping");
    assert_eq!(recv_text(&b).await, "ping");
}

#[tokio::test]
async fn disconnected_peers_leave_the_room() {
    let running = Running::start(false).await;
    let a = running.connect("/r").await;
    let b = running.connect("/r").await;

    b.close().await.unwrap();
    running.wait_room("/r", 1).await;

    assert_eq!(running.relay.peer_count(), 1);
    a.send("still open").await.unwrap();
}

// ===========================================
// Stores syncing through the relay
// ===========================================

struct Store {
    kv: SharedKv,
    supervisor: ConnectivitySupervisor,
}

impl Store {
    async fn start(endpoint: &str) -> Self {
        let kv = SharedKv::new(Snapshot::new(), Arc::new(MemoryPersistence::new()));
        let supervisor = ConnectivitySupervisor::spawn(
            kv.clone(),
            endpoint,
            WebSocketTransport::new,
            SupervisorConfig::default(),
        );
        let mut status = supervisor.watch_status();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.phase == Phase::Open),
        )
        .await
        .expect("channel did not open")
        .unwrap();
        Self { kv, supervisor }
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met");
}

#[tokio::test]
async fn stores_converge_through_reflecting_relay() {
    let running = Running::start(true).await;
    let a = Store::start(&running.url("/kv")).await;
    let b = Store::start(&running.url("/kv")).await;
    running.wait_room("/kv", 2).await;

    a.kv.set("colour", json!("blue"));
    b.kv.set("size", json!(3));
    eventually(|| b.kv.get("colour") == Some(json!("blue"))).await;
    eventually(|| a.kv.get("size") == Some(json!(3))).await;

    a.kv.delete("size");
    eventually(|| !b.kv.has("size")).await;

    // Each store discarded its own reflected frames.
    assert_eq!(a.kv.keys(), vec!["colour"]);
    assert_eq!(b.kv.keys(), vec!["colour"]);

    a.supervisor.shutdown().await;
    b.supervisor.shutdown().await;
    running.wait_room("/kv", 0).await;
}
