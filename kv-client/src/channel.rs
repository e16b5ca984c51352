//! One duplex sync connection.
//!
//! A [`SyncChannel`] connects a [`Transport`] to a relay, attaches itself
//! to the [`SharedKv`] as its outbound sink, and applies inbound change
//! frames until the connection ends or the channel is closed. An instance
//! is single-use: once closed it never reopens. The supervisor opens a new
//! channel instead.
//!
//! Echo handling: the channel keeps an [`EchoGuard`] armed with the
//! timestamps of its sends that have not come back yet. An inbound frame
//! carrying one of them, or this process's origin id, is our own change
//! coming back.

use parking_lot::Mutex;
use sharedkv_core::{ChannelState, EchoGuard};
use sharedkv_types::{wire, ChangeEvent, OriginId, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::SendError;
use crate::kv::{ChangeSink, SharedKv};
use crate::transport::Transport;

/// What to do with our own changes when the relay reflects them back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Drop them.
    #[default]
    Discard,
    /// Apply them again (harmless, since applying is idempotent).
    Apply,
}

/// Per-channel behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Handling of reflected changes.
    pub echo_policy: EchoPolicy,
    /// Add this process's origin id to outbound frames.
    pub tag_origin: bool,
}

/// Message counters for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Frames queued for sending.
    pub sent: u64,
    /// Frames received while open.
    pub received: u64,
    /// Remote changes applied to the store.
    pub applied: u64,
    /// Own changes recognised on the way back.
    pub echoes: u64,
    /// Frames that were malformed or of an unknown type.
    pub ignored: u64,
}

/// How a channel's connection ended up, reported to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Connected and attached to the store.
    Opened,
    /// The connection attempt failed.
    ConnectFailed(String),
    /// An open connection ended.
    Closed(String),
}

/// A lifecycle report from channel `channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    /// Id the channel was opened with.
    pub channel: u64,
    /// What happened.
    pub outcome: ChannelOutcome,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    applied: AtomicU64,
    echoes: AtomicU64,
    ignored: AtomicU64,
}

struct LinkState {
    state: ChannelState,
    guard: EchoGuard,
}

/// State shared between the channel handle, its task, and the store.
struct ChannelLink {
    id: u64,
    origin: OriginId,
    config: ChannelConfig,
    inner: Mutex<LinkState>,
    outbound: mpsc::UnboundedSender<String>,
    counters: Counters,
}

impl ChannelLink {
    fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    fn set_state(&self, state: ChannelState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        if !state.is_open() {
            inner.guard.clear();
        }
    }

    /// Handle one inbound frame.
    fn receive(&self, frame: &[u8], kv: &SharedKv) {
        if !self.state().is_open() {
            return;
        }
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let event = match wire::decode(frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                trace!(channel = self.id, "ignoring frame of unknown type");
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(e) => {
                debug!(channel = self.id, error = %e, "ignoring malformed frame");
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if self.is_own(&event) {
            self.counters.echoes.fetch_add(1, Ordering::Relaxed);
            if self.config.echo_policy == EchoPolicy::Discard {
                trace!(channel = self.id, key = %event.key, "discarding echo");
                return;
            }
        }

        kv.apply_remote(&event);
        self.counters.applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether `event` is one of ours coming back. Clears the guard on a
    /// timestamp match.
    fn is_own(&self, event: &ChangeEvent) -> bool {
        let mut inner = self.inner.lock();
        match event.origin {
            Some(origin) if origin != self.origin => false,
            Some(_) => {
                inner.guard.take_echo(event.timestamp);
                true
            }
            None => inner.guard.take_echo(event.timestamp),
        }
    }

    fn stats(&self) -> ChannelStats {
        ChannelStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            echoes: self.counters.echoes.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
        }
    }
}

impl ChangeSink for ChannelLink {
    fn publish(&self, event: ChangeEvent) -> Result<Timestamp, SendError> {
        let mut inner = self.inner.lock();
        if !inner.state.is_open() {
            return Err(SendError::NotOpen);
        }

        let event = if self.config.tag_origin {
            event.with_origin(self.origin)
        } else {
            event
        };
        let frame = wire::encode(&event)?;
        self.outbound
            .send(frame)
            .map_err(|_| SendError::QueueClosed)?;

        if let Some(evicted) = inner.guard.arm(event.timestamp) {
            trace!(channel = self.id, %evicted, "echo marker evicted");
        }
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        Ok(event.timestamp)
    }
}

/// Handle to a running sync connection.
///
/// Dropping the handle closes the channel.
pub struct SyncChannel {
    link: Arc<ChannelLink>,
    kv: SharedKv,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncChannel")
            .field("id", &self.link.id)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl SyncChannel {
    /// Start connecting `transport` to `endpoint` on a new task.
    ///
    /// Lifecycle changes are sent to `reports`; the receiver may be gone.
    pub fn open<T>(
        id: u64,
        endpoint: impl Into<String>,
        transport: T,
        kv: SharedKv,
        config: ChannelConfig,
        reports: mpsc::UnboundedSender<ChannelReport>,
    ) -> Self
    where
        T: Transport + 'static,
    {
        let (outbound, queued) = mpsc::unbounded_channel();
        let (shutdown, stop) = oneshot::channel();
        let link = Arc::new(ChannelLink {
            id,
            origin: kv.origin(),
            config,
            inner: Mutex::new(LinkState {
                state: ChannelState::Connecting,
                guard: EchoGuard::new(),
            }),
            outbound,
            counters: Counters::default(),
        });

        let task = tokio::spawn(run_channel(
            link.clone(),
            endpoint.into(),
            transport,
            kv.clone(),
            queued,
            stop,
            reports,
        ));

        Self {
            link,
            kv,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Id the channel was opened with.
    pub fn id(&self) -> u64 {
        self.link.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.link.state()
    }

    /// Timestamp of the last send not yet seen coming back.
    pub fn pending_echo(&self) -> Option<Timestamp> {
        self.link.inner.lock().guard.pending()
    }

    /// Number of sends not yet seen coming back.
    pub fn echoes_in_flight(&self) -> usize {
        self.link.inner.lock().guard.in_flight()
    }

    /// Message counters.
    pub fn stats(&self) -> ChannelStats {
        self.link.stats()
    }

    /// Close the channel. Inbound processing stops at once; the transport
    /// is closed in the background. Safe to call more than once.
    pub fn close(&mut self) {
        self.link.set_state(ChannelState::Closed);
        self.kv.detach(self.link.id);
        if let Some(shutdown) = self.shutdown.take() {
            // The task may already have exited on its own.
            let _ = shutdown.send(());
        }
    }

    /// Close the channel and wait for its task to finish.
    pub async fn close_and_wait(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_channel<T: Transport>(
    link: Arc<ChannelLink>,
    endpoint: String,
    transport: T,
    kv: SharedKv,
    mut queued: mpsc::UnboundedReceiver<String>,
    mut stop: oneshot::Receiver<()>,
    reports: mpsc::UnboundedSender<ChannelReport>,
) {
    let report = |outcome| {
        let _ = reports.send(ChannelReport {
            channel: link.id,
            outcome,
        });
    };

    let connected = tokio::select! {
        result = transport.connect(&endpoint) => result,
        _ = &mut stop => {
            let _ = transport.close().await;
            return;
        }
    };
    if let Err(e) = connected {
        debug!(channel = link.id, %endpoint, error = %e, "connect failed");
        link.set_state(ChannelState::Closed);
        report(ChannelOutcome::ConnectFailed(e.to_string()));
        return;
    }

    let opened = {
        // close() may have run while connecting.
        let mut inner = link.inner.lock();
        let still_wanted = inner.state == ChannelState::Connecting;
        if still_wanted {
            inner.state = ChannelState::Open;
        }
        still_wanted
    };
    if !opened {
        let _ = transport.close().await;
        return;
    }
    kv.attach(link.id, link.clone());
    info!(channel = link.id, %endpoint, "sync channel open");
    report(ChannelOutcome::Opened);

    let reason = loop {
        tokio::select! {
            biased;
            _ = &mut stop => {
                // Changes accepted while open still go out.
                while let Ok(frame) = queued.try_recv() {
                    if transport.send(&frame).await.is_err() {
                        break;
                    }
                }
                break None;
            }
            Some(frame) = queued.recv() => {
                if let Err(e) = transport.send(&frame).await {
                    break Some(e.to_string());
                }
            }
            inbound = transport.recv() => match inbound {
                Ok(frame) => link.receive(&frame, &kv),
                Err(e) => break Some(e.to_string()),
            },
        }
    };

    link.set_state(ChannelState::Closed);
    kv.detach(link.id);
    // Errors on close are irrelevant once we are done with the connection.
    let _ = transport.close().await;

    match reason {
        Some(reason) => {
            info!(channel = link.id, %reason, "sync channel lost");
            report(ChannelOutcome::Closed(reason));
        }
        None => debug!(channel = link.id, "sync channel closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use crate::transport::MockTransport;
    use serde_json::json;
    use sharedkv_types::Snapshot;
    use std::time::Duration;

    struct Harness {
        kv: SharedKv,
        transport: MockTransport,
        channel: SyncChannel,
        reports: mpsc::UnboundedReceiver<ChannelReport>,
    }

    async fn open_with(config: ChannelConfig) -> Harness {
        let kv = SharedKv::new(Snapshot::new(), Arc::new(MemoryPersistence::new()));
        let transport = MockTransport::new();
        let (tx, mut reports) = mpsc::unbounded_channel();
        let channel = SyncChannel::open(1, "ws://relay", transport.clone(), kv.clone(), config, tx);
        let first = reports.recv().await.unwrap();
        assert_eq!(first.outcome, ChannelOutcome::Opened);
        Harness {
            kv,
            transport,
            channel,
            reports,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // ===========================================
    // Outbound
    // ===========================================

    #[tokio::test]
    async fn local_set_sends_exact_frame_and_arms_guard() {
        let h = open_with(ChannelConfig::default()).await;
        assert_eq!(h.channel.state(), ChannelState::Open);
        assert!(h.channel.pending_echo().is_none());

        h.kv.set("c", json!(3));
        settle().await;

        let ts = h.channel.pending_echo().expect("guard armed");
        let sent = h.transport.sent_messages();
        assert_eq!(sent.len(), 1);
        let frame: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(
            frame,
            json!({"type": "set", "key": "c", "update": ts.value(), "value": 3})
        );
    }

    #[tokio::test]
    async fn consecutive_local_edits_are_all_sent() {
        let h = open_with(ChannelConfig::default()).await;

        h.kv.set("a", json!(1));
        h.kv.set("b", json!(2));
        h.kv.delete("a");
        settle().await;

        assert_eq!(h.transport.sent_messages().len(), 3);
        assert_eq!(h.channel.stats().sent, 3);
    }

    #[tokio::test]
    async fn tagged_frames_carry_origin() {
        let h = open_with(ChannelConfig {
            tag_origin: true,
            ..Default::default()
        })
        .await;

        h.kv.set("k", json!(null));
        settle().await;

        let frame: serde_json::Value =
            serde_json::from_str(&h.transport.last_sent().unwrap()).unwrap();
        assert_eq!(frame["origin"], json!(h.kv.origin().to_string()));
    }

    // ===========================================
    // Inbound
    // ===========================================

    #[tokio::test]
    async fn remote_change_is_applied_not_resent() {
        let h = open_with(ChannelConfig::default()).await;

        h.transport
            .queue_response(r#"{"type":"set","key":"r","update":5,"value":"remote"}"#);
        settle().await;

        assert_eq!(h.kv.get("r"), Some(json!("remote")));
        assert!(h.transport.sent_messages().is_empty());
        assert_eq!(h.channel.stats().applied, 1);
    }

    #[tokio::test]
    async fn echo_is_discarded_and_clears_guard() {
        let h = open_with(ChannelConfig::default()).await;
        h.kv.set("e", json!(1));
        settle().await;
        assert!(h.channel.pending_echo().is_some());

        // A peer overwrote locally before our echo came back.
        h.kv.apply_remote(&ChangeEvent::set("e", json!(2), Timestamp::new(1)));
        h.transport.queue_response(h.transport.last_sent().unwrap());
        settle().await;

        assert!(h.channel.pending_echo().is_none());
        assert_eq!(h.kv.get("e"), Some(json!(2)));
        assert_eq!(h.channel.stats().echoes, 1);
    }

    #[tokio::test]
    async fn overlapping_echoes_do_not_roll_back() {
        let h = open_with(ChannelConfig::default()).await;
        h.kv.set("k", json!(1));
        h.kv.set("k", json!(2));
        settle().await;
        assert_eq!(h.channel.echoes_in_flight(), 2);

        for frame in h.transport.sent_messages() {
            h.transport.queue_response(frame);
        }
        settle().await;

        assert_eq!(h.kv.get("k"), Some(json!(2)));
        assert_eq!(h.channel.stats().echoes, 2);
        assert_eq!(h.channel.stats().applied, 0);
        assert_eq!(h.channel.echoes_in_flight(), 0);
    }

    #[tokio::test]
    async fn apply_policy_reapplies_echo() {
        let h = open_with(ChannelConfig {
            echo_policy: EchoPolicy::Apply,
            ..Default::default()
        })
        .await;
        h.kv.set("e", json!(1));
        settle().await;

        h.kv.apply_remote(&ChangeEvent::set("e", json!(2), Timestamp::new(1)));
        h.transport.queue_response(h.transport.last_sent().unwrap());
        settle().await;

        assert!(h.channel.pending_echo().is_none());
        assert_eq!(h.kv.get("e"), Some(json!(1)));
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_are_ignored() {
        let h = open_with(ChannelConfig::default()).await;

        h.transport.queue_response("not json");
        h.transport
            .queue_response(r#"{"type":"rename","key":"a","update":1}"#);
        h.transport
            .queue_response(r#"{"type":"delete","key":"gone","update":2}"#);
        settle().await;

        let stats = h.channel.stats();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.ignored, 2);
        assert_eq!(stats.applied, 1);
        assert_eq!(h.channel.state(), ChannelState::Open);
    }

    // ===========================================
    // Lifecycle
    // ===========================================

    #[tokio::test]
    async fn close_detaches_and_stops_processing() {
        let mut h = open_with(ChannelConfig::default()).await;

        h.channel.close();
        assert_eq!(h.channel.state(), ChannelState::Closed);
        assert!(!h.kv.is_attached());

        h.kv.set("after", json!(1));
        h.transport
            .queue_response(r#"{"type":"set","key":"late","update":9,"value":1}"#);
        settle().await;

        assert!(h.transport.sent_messages().is_empty());
        assert!(!h.kv.has("late"));
        assert!(!h.transport.is_connected());
        // Closing locally is not reported as a loss.
        assert!(h.reports.try_recv().is_err());

        h.channel.close();
    }

    #[tokio::test]
    async fn remote_close_is_reported() {
        let mut h = open_with(ChannelConfig::default()).await;

        h.transport.drop_connection();
        let report = h.reports.recv().await.unwrap();

        assert_eq!(report.channel, 1);
        assert!(matches!(report.outcome, ChannelOutcome::Closed(_)));
        assert_eq!(h.channel.state(), ChannelState::Closed);
        assert!(!h.kv.is_attached());
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let kv = SharedKv::new(Snapshot::new(), Arc::new(MemoryPersistence::new()));
        let transport = MockTransport::new();
        transport.fail_next_connect("refused");
        let (tx, mut reports) = mpsc::unbounded_channel();

        let channel = SyncChannel::open(7, "ws://relay", transport, kv.clone(), ChannelConfig::default(), tx);
        let report = reports.recv().await.unwrap();

        assert_eq!(
            report,
            ChannelReport {
                channel: 7,
                outcome: ChannelOutcome::ConnectFailed("connection failed: refused".into()),
            }
        );
        assert_eq!(channel.state(), ChannelState::Closed);
        assert!(!kv.is_attached());
    }

    #[tokio::test]
    async fn send_failure_closes_channel() {
        let mut h = open_with(ChannelConfig::default()).await;
        h.transport.fail_next_send("broken pipe");

        h.kv.set("a", json!(1));
        let report = h.reports.recv().await.unwrap();

        assert_eq!(
            report.outcome,
            ChannelOutcome::Closed("send failed: broken pipe".into())
        );
        assert_eq!(h.kv.get("a"), Some(json!(1)));
    }
}
