//! The process-facing store handle.
//!
//! [`SharedKv`] owns the [`OrderedStore`] and is the only thing that swaps
//! it. Local edits take one synchronous critical section: update memory,
//! stamp and hand the change to the attached sink, queue a persistence
//! write. Nothing in that section awaits.
//!
//! Persistence runs on a writer task. Writes happen in order and queued
//! writes are coalesced to the latest snapshot. A failed write is logged
//! and published as [`StoreEvent::PersistenceFailed`]; memory is never
//! rolled back.

use parking_lot::Mutex;
use serde_json::Value;
use sharedkv_core::{OrderedStore, TimestampClock};
use sharedkv_types::{ChangeEvent, OriginId, Snapshot, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use crate::debounce::Debouncer;
use crate::error::{KvError, SendError};
use crate::persistence::PersistenceBridge;

const EVENT_CAPACITY: usize = 256;

/// Receiver of outbound changes, implemented by an open sync channel.
pub trait ChangeSink: Send + Sync {
    /// Queue `event` for sending. Called with the store lock held; must not
    /// block.
    fn publish(&self, event: ChangeEvent) -> Result<Timestamp, SendError>;
}

/// Where a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// A mutation made through this handle.
    Local,
    /// A change received from a peer.
    Remote,
}

/// Notifications published to [`SharedKv::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// One key was set, moved or deleted.
    Changed {
        /// Affected key.
        key: String,
        /// Who made the change.
        source: ChangeSource,
    },
    /// The whole store was replaced.
    Reloaded,
    /// A persistence write failed. The in-memory store keeps the change.
    PersistenceFailed {
        /// Error description.
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveKind {
    Incremental,
    Rewrite,
}

enum WriterCommand {
    Save(Snapshot, SaveKind),
    Flush(oneshot::Sender<()>),
}

struct Attached {
    id: u64,
    sink: Arc<dyn ChangeSink>,
}

struct KvState {
    store: OrderedStore,
    clock: TimestampClock,
    sink: Option<Attached>,
}

struct KvInner {
    state: Mutex<KvState>,
    origin: OriginId,
    events: broadcast::Sender<StoreEvent>,
    writer: mpsc::UnboundedSender<WriterCommand>,
    persistence: Arc<dyn PersistenceBridge>,
}

/// Cloneable handle to one shared ordered store.
///
/// Must be created inside a Tokio runtime: construction spawns the
/// persistence writer, which exits once every clone is dropped.
#[derive(Clone)]
pub struct SharedKv {
    inner: Arc<KvInner>,
}

impl std::fmt::Debug for SharedKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKv")
            .field("origin", &self.inner.origin)
            .field("len", &self.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl SharedKv {
    /// Load the snapshot from `persistence` and build a handle around it.
    pub async fn open(persistence: Arc<dyn PersistenceBridge>) -> Result<Self, KvError> {
        let snapshot = persistence.load_snapshot().await?;
        Ok(Self::new(snapshot, persistence))
    }

    /// Build a handle around `snapshot` without touching storage.
    pub fn new(snapshot: Snapshot, persistence: Arc<dyn PersistenceBridge>) -> Self {
        Self::with_clock(snapshot, persistence, TimestampClock::system())
    }

    /// Like [`SharedKv::new`] with an explicit timestamp source.
    pub fn with_clock(
        snapshot: Snapshot,
        persistence: Arc<dyn PersistenceBridge>,
        clock: TimestampClock,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (writer, commands) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(commands, persistence.clone(), events.clone()));

        Self {
            inner: Arc::new(KvInner {
                state: Mutex::new(KvState {
                    store: OrderedStore::from_snapshot(snapshot),
                    clock,
                    sink: None,
                }),
                origin: OriginId::random(),
                events,
                writer,
                persistence,
            }),
        }
    }

    /// Identifier of this process in tagged change events.
    pub fn origin(&self) -> OriginId {
        self.inner.origin
    }

    // ===========================================
    // Reads
    // ===========================================

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().store.get(key).cloned()
    }

    /// Whether `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.inner.state.lock().store.has(key)
    }

    /// Keys in store order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.state.lock().store.keys()
    }

    /// Values in store order.
    pub fn values(&self) -> Vec<Value> {
        self.inner.state.lock().store.values()
    }

    /// Key/value pairs in store order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.inner.state.lock().store.entries()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().store.is_empty()
    }

    /// Copy of the full contents.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.state.lock().store.to_snapshot()
    }

    // ===========================================
    // Local mutations
    // ===========================================

    /// Set `key` to `value`. Existing keys keep their position.
    ///
    /// The change is visible immediately, persisted, and sent to peers if a
    /// channel is attached. Sync failures do not affect the result.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let snapshot = {
            let mut state = self.inner.state.lock();
            state.store.set(key.clone(), value.clone());
            state.publish(|ts| ChangeEvent::set(key.clone(), value, ts));
            state.store.to_snapshot()
        };
        self.persist(snapshot, SaveKind::Incremental);
        self.notify(StoreEvent::Changed {
            key,
            source: ChangeSource::Local,
        });
    }

    /// Remove `key`. Removing an absent key changes nothing locally but is
    /// still persisted and announced to peers.
    pub fn delete(&self, key: &str) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            state.store.delete(key);
            state.publish(|ts| ChangeEvent::delete(key, ts));
            state.store.to_snapshot()
        };
        self.persist(snapshot, SaveKind::Incremental);
        self.notify(StoreEvent::Changed {
            key: key.to_string(),
            source: ChangeSource::Local,
        });
    }

    /// Move or insert `key` so it sits at `position`.
    ///
    /// Takes the full-rewrite persistence path and is never sent to peers.
    pub fn set_at(
        &self,
        key: impl Into<String>,
        value: Value,
        position: usize,
    ) -> Result<(), KvError> {
        let key = key.into();
        let snapshot = {
            let mut state = self.inner.state.lock();
            state.store.set_at(key.clone(), value, position)?;
            state.store.to_snapshot()
        };
        self.persist(snapshot, SaveKind::Rewrite);
        self.notify(StoreEvent::Changed {
            key,
            source: ChangeSource::Local,
        });
        Ok(())
    }

    /// Replace the whole store with `snapshot` and write it out in full.
    ///
    /// Not sent to peers.
    pub fn replace(&self, snapshot: Snapshot) {
        self.inner.state.lock().store = OrderedStore::from_snapshot(snapshot.clone());
        self.persist(snapshot, SaveKind::Rewrite);
        self.notify(StoreEvent::Reloaded);
    }

    /// Parse `text` as a JSON object and [`replace`](SharedKv::replace)
    /// the store with it. Anything but an object is rejected and leaves the
    /// store unchanged.
    pub fn import_json(&self, text: &str) -> Result<(), KvError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| KvError::InvalidSnapshot(e.to_string()))?;
        match value {
            Value::Object(map) => {
                self.replace(map.into_iter().collect());
                Ok(())
            }
            other => Err(KvError::InvalidSnapshot(format!(
                "expected a JSON object, found {}",
                json_type_name(&other)
            ))),
        }
    }

    // ===========================================
    // Remote changes and reloads
    // ===========================================

    /// Apply a change received from a peer. Persisted, never re-sent.
    pub fn apply_remote(&self, event: &ChangeEvent) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            state.store.apply(event);
            state.store.to_snapshot()
        };
        debug!(key = %event.key, kind = event.type_name(), update = %event.timestamp, "applied remote change");
        self.persist(snapshot, SaveKind::Incremental);
        self.notify(StoreEvent::Changed {
            key: event.key.clone(),
            source: ChangeSource::Remote,
        });
    }

    /// Discard the in-memory store and rebuild it from persistence.
    ///
    /// On error the current store is kept.
    pub async fn reload(&self) -> Result<(), KvError> {
        self.flush().await;
        let snapshot = self.inner.persistence.load_snapshot().await?;
        self.inner.state.lock().store = OrderedStore::from_snapshot(snapshot);
        debug!("store reloaded from persistence");
        self.notify(StoreEvent::Reloaded);
        Ok(())
    }

    /// Debounced trigger that reloads the store when storage changes
    /// behind this handle's back.
    pub fn external_change_watcher(&self, quiet: Duration) -> Debouncer {
        let kv = self.clone();
        Debouncer::spawn(quiet, move || {
            let kv = kv.clone();
            async move {
                if let Err(e) = kv.reload().await {
                    warn!(error = %e, "reload after external change failed");
                }
            }
        })
    }

    /// Subscribe to store notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until every persistence write queued so far has finished.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.inner.writer.send(WriterCommand::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    // ===========================================
    // Sink attachment
    // ===========================================

    /// Route outbound changes to `sink`, replacing any earlier sink.
    pub fn attach(&self, id: u64, sink: Arc<dyn ChangeSink>) {
        self.inner.state.lock().sink = Some(Attached { id, sink });
    }

    /// Stop routing changes to sink `id`. A newer sink stays attached.
    pub fn detach(&self, id: u64) {
        let mut state = self.inner.state.lock();
        if state.sink.as_ref().is_some_and(|s| s.id == id) {
            state.sink = None;
        }
    }

    /// Whether a sink is attached.
    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().sink.is_some()
    }

    fn persist(&self, snapshot: Snapshot, kind: SaveKind) {
        if self
            .inner
            .writer
            .send(WriterCommand::Save(snapshot, kind))
            .is_err()
        {
            warn!("persistence writer stopped; change kept in memory only");
        }
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

impl KvState {
    fn publish(&mut self, build: impl FnOnce(Timestamp) -> ChangeEvent) {
        let Some(attached) = &self.sink else {
            return;
        };
        let event = build(self.clock.next());
        // Sync is best-effort; the local edit stands either way.
        if let Err(e) = attached.sink.publish(event) {
            debug!(error = %e, "change not sent");
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

async fn run_writer(
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    persistence: Arc<dyn PersistenceBridge>,
    events: broadcast::Sender<StoreEvent>,
) {
    while let Some(first) = commands.recv().await {
        let mut pending: Option<(Snapshot, SaveKind)> = None;
        let mut waiters = Vec::new();
        let mut next = Some(first);

        while let Some(command) = next.take() {
            match command {
                WriterCommand::Save(snapshot, kind) => {
                    let kind = match pending {
                        Some((_, SaveKind::Rewrite)) => SaveKind::Rewrite,
                        _ => kind,
                    };
                    pending = Some((snapshot, kind));
                }
                WriterCommand::Flush(done) => waiters.push(done),
            }
            next = commands.try_recv().ok();
        }

        if let Some((snapshot, kind)) = pending {
            let result = match kind {
                SaveKind::Incremental => persistence.save_snapshot(&snapshot).await,
                SaveKind::Rewrite => persistence.rewrite_snapshot(&snapshot).await,
            };
            if let Err(e) = result {
                warn!(error = %e, "failed to persist store");
                let _ = events.send(StoreEvent::PersistenceFailed {
                    error: e.to_string(),
                });
            }
        }

        for done in waiters {
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;
    use serde_json::json;
    use sharedkv_core::ManualClock;

    struct RecordingSink(Mutex<Vec<ChangeEvent>>);

    impl ChangeSink for RecordingSink {
        fn publish(&self, event: ChangeEvent) -> Result<Timestamp, SendError> {
            let ts = event.timestamp;
            self.0.lock().push(event);
            Ok(ts)
        }
    }

    struct ClosedSink;

    impl ChangeSink for ClosedSink {
        fn publish(&self, _event: ChangeEvent) -> Result<Timestamp, SendError> {
            Err(SendError::NotOpen)
        }
    }

    fn kv_with(persistence: &Arc<MemoryPersistence>) -> SharedKv {
        SharedKv::new(persistence.stored(), persistence.clone())
    }

    // ===========================================
    // Local mutations
    // ===========================================

    #[tokio::test]
    async fn mutations_without_sink_are_local_and_persisted() {
        let persistence = Arc::new(MemoryPersistence::new());
        let kv = kv_with(&persistence);

        kv.set("a", json!(1));
        kv.set("b", json!(2));
        kv.delete("a");
        kv.flush().await;

        assert_eq!(kv.entries(), vec![("b".to_string(), json!(2))]);
        assert_eq!(persistence.stored(), kv.snapshot());
        assert!(persistence.rewrites().is_empty());
    }

    #[tokio::test]
    async fn set_keeps_position_of_existing_key() {
        let kv = SharedKv::new(Snapshot::new(), Arc::new(MemoryPersistence::new()));

        kv.set("a", json!(1));
        kv.set("b", json!(2));
        kv.set("a", json!(3));

        assert_eq!(kv.keys(), vec!["a", "b"]);
        assert_eq!(kv.get("a"), Some(json!(3)));
        assert!(kv.has("b"));
        assert_eq!(kv.len(), 2);
    }

    #[tokio::test]
    async fn attached_sink_receives_stamped_events() {
        let clock = ManualClock::new(1_000);
        let kv = SharedKv::with_clock(
            Snapshot::new(),
            Arc::new(MemoryPersistence::new()),
            TimestampClock::new(Arc::new(clock)),
        );
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        kv.attach(1, sink.clone());

        kv.set("x", json!("v"));
        kv.delete("x");

        let sent = sink.0.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], ChangeEvent::set("x", json!("v"), Timestamp::new(1_000)));
        assert_eq!(sent[1], ChangeEvent::delete("x", Timestamp::new(1_001)));
    }

    #[tokio::test]
    async fn send_failure_does_not_fail_mutation() {
        let persistence = Arc::new(MemoryPersistence::new());
        let kv = kv_with(&persistence);
        kv.attach(1, Arc::new(ClosedSink));

        kv.set("a", json!(1));
        kv.flush().await;

        assert_eq!(kv.get("a"), Some(json!(1)));
        assert_eq!(persistence.stored().get("a"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn detach_ignores_stale_ids() {
        let kv = SharedKv::new(Snapshot::new(), Arc::new(MemoryPersistence::new()));
        kv.attach(1, Arc::new(ClosedSink));
        kv.attach(2, Arc::new(ClosedSink));

        kv.detach(1);
        assert!(kv.is_attached());

        kv.detach(2);
        assert!(!kv.is_attached());
    }

    // ===========================================
    // Positional set and wholesale replacement
    // ===========================================

    #[tokio::test]
    async fn set_at_rewrites_and_is_not_sent() {
        let persistence = Arc::new(MemoryPersistence::new());
        let kv = kv_with(&persistence);
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        kv.set("a", json!(1));
        kv.set("b", json!(2));
        kv.set("c", json!(3));
        kv.attach(1, sink.clone());

        kv.set_at("b", json!(20), 0).unwrap();
        kv.flush().await;

        assert_eq!(kv.keys(), vec!["b", "a", "c"]);
        assert_eq!(kv.get("b"), Some(json!(20)));
        assert!(sink.0.lock().is_empty());
        assert_eq!(persistence.rewrites().last(), Some(&kv.snapshot()));
    }

    #[tokio::test]
    async fn set_at_out_of_range_leaves_store_unchanged() {
        let kv = SharedKv::new(Snapshot::new(), Arc::new(MemoryPersistence::new()));
        assert!(matches!(
            kv.set_at("a", json!(1), 0),
            Err(KvError::InvalidPosition(_))
        ));

        kv.set("a", json!(1));
        kv.set("b", json!(2));
        assert!(kv.set_at("c", json!(3), 2).is_ok());
        assert!(kv.set_at("d", json!(4), 5).is_err());
        assert_eq!(kv.keys(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn import_json_validates_object() {
        let persistence = Arc::new(MemoryPersistence::new());
        let kv = kv_with(&persistence);
        kv.set("old", json!(true));

        assert!(matches!(
            kv.import_json("[1, 2]"),
            Err(KvError::InvalidSnapshot(_))
        ));
        assert!(matches!(
            kv.import_json("{ broken"),
            Err(KvError::InvalidSnapshot(_))
        ));
        assert_eq!(kv.keys(), vec!["old"]);

        kv.import_json(r#"{"z": 1, "y": {"nested": true}}"#).unwrap();
        kv.flush().await;

        assert_eq!(kv.keys(), vec!["z", "y"]);
        assert_eq!(persistence.rewrites().last(), Some(&kv.snapshot()));
    }

    // ===========================================
    // Remote changes, reload, notifications
    // ===========================================

    #[tokio::test]
    async fn apply_remote_is_idempotent_and_never_sent() {
        let kv = SharedKv::new(Snapshot::new(), Arc::new(MemoryPersistence::new()));
        let sink = Arc::new(RecordingSink(Mutex::new(Vec::new())));
        kv.attach(1, sink.clone());
        let event = ChangeEvent::set("k", json!([1, 2]), Timestamp::new(7));

        kv.apply_remote(&event);
        let once = kv.entries();
        kv.apply_remote(&event);

        assert_eq!(kv.entries(), once);
        assert!(sink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn reload_swaps_store_and_notifies() {
        let persistence = Arc::new(MemoryPersistence::new());
        let kv = kv_with(&persistence);
        let mut events = kv.subscribe();

        persistence.set_stored([("fresh".to_string(), json!(1))].into_iter().collect());
        kv.reload().await.unwrap();

        assert_eq!(kv.keys(), vec!["fresh"]);
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Reloaded);
    }

    #[tokio::test]
    async fn subscribers_see_local_and_remote_changes() {
        let kv = SharedKv::new(Snapshot::new(), Arc::new(MemoryPersistence::new()));
        let mut events = kv.subscribe();

        kv.set("a", json!(1));
        kv.apply_remote(&ChangeEvent::delete("a", Timestamp::new(3)));

        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Changed {
                key: "a".into(),
                source: ChangeSource::Local
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Changed {
                key: "a".into(),
                source: ChangeSource::Remote
            }
        );
    }

    #[tokio::test]
    async fn persistence_failure_is_published_not_rolled_back() {
        let persistence = Arc::new(MemoryPersistence::new());
        persistence.fail_saves(Some("read-only"));
        let kv = kv_with(&persistence);
        let mut events = kv.subscribe();

        kv.set("a", json!(1));
        kv.flush().await;

        assert_eq!(kv.get("a"), Some(json!(1)));
        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, StoreEvent::PersistenceFailed { .. }) {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }
}
