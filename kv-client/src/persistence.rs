//! Snapshot and endpoint persistence.
//!
//! [`PersistenceBridge`] is the boundary between the store and whatever
//! owns the durable copy. Two implementations ship here:
//!
//! - [`JsonFilePersistence`] keeps a settings file shaped like
//!   `{ "kvdata": { ... }, "serverurl": "" }`
//! - [`MemoryPersistence`] records every call for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sharedkv_types::Snapshot;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Reading or writing the backing file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not valid settings JSON.
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure injected by [`MemoryPersistence::fail_saves`].
    #[error("injected failure: {0}")]
    Injected(String),
}

/// Durable storage for the store snapshot and the sync endpoint.
#[async_trait]
pub trait PersistenceBridge: Send + Sync {
    /// Load the stored snapshot. Missing storage yields an empty snapshot.
    async fn load_snapshot(&self) -> Result<Snapshot, PersistenceError>;

    /// Persist the snapshot after an ordinary mutation.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError>;

    /// Persist the snapshot after a wholesale change such as a reorder or
    /// an imported replacement.
    async fn rewrite_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        self.save_snapshot(snapshot).await
    }

    /// Load the configured endpoint; empty means sync is disabled.
    async fn load_endpoint(&self) -> Result<String, PersistenceError>;

    /// Persist the endpoint.
    async fn save_endpoint(&self, endpoint: &str) -> Result<(), PersistenceError>;
}

/// On-disk settings document.
///
/// Fields this crate does not know about are carried through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Store contents, in order.
    #[serde(default)]
    pub kvdata: Snapshot,

    /// Sync endpoint, empty when disabled.
    #[serde(default)]
    pub serverurl: String,

    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Settings {
    /// Parse a settings document.
    pub fn from_json(text: &str) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Settings file persistence.
///
/// Every write is a read-modify-write of the whole file, so the snapshot
/// and the endpoint can be saved independently. Writes go to a sibling
/// temporary file which is then renamed over the original.
#[derive(Debug)]
pub struct JsonFilePersistence {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFilePersistence {
    /// Persist to the settings file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Path of the settings file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full settings document, or defaults if the file is missing.
    pub async fn load_settings(&self) -> Result<Settings, PersistenceError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Settings::default()),
            Ok(text) => Settings::from_json(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(source) => Err(PersistenceError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn update<F>(&self, edit: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut Settings) + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.load_settings().await?;
        edit(&mut settings);
        self.write_atomic(&settings.to_json()?).await
    }

    async fn write_atomic(&self, contents: &str) -> Result<(), PersistenceError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| PersistenceError::Io { path, source }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(io_err(parent))?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, contents).await.map_err(io_err(&tmp))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(io_err(&self.path))
    }
}

#[async_trait]
impl PersistenceBridge for JsonFilePersistence {
    async fn load_snapshot(&self) -> Result<Snapshot, PersistenceError> {
        Ok(self.load_settings().await?.kvdata)
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        let snapshot = snapshot.clone();
        self.update(move |settings| settings.kvdata = snapshot).await
    }

    async fn load_endpoint(&self) -> Result<String, PersistenceError> {
        Ok(self.load_settings().await?.serverurl)
    }

    async fn save_endpoint(&self, endpoint: &str) -> Result<(), PersistenceError> {
        let endpoint = endpoint.to_string();
        self.update(move |settings| settings.serverurl = endpoint)
            .await
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    settings: Settings,
    saves: Vec<Snapshot>,
    rewrites: Vec<Snapshot>,
    fail_saves: Option<String>,
}

/// In-memory persistence that records every write.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    inner: Mutex<MemoryInner>,
}

impl MemoryPersistence {
    /// Empty snapshot, no endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the given snapshot and endpoint.
    pub fn with_contents(snapshot: Snapshot, endpoint: &str) -> Self {
        let persistence = Self::default();
        {
            let mut inner = persistence.inner.lock();
            inner.settings.kvdata = snapshot;
            inner.settings.serverurl = endpoint.to_string();
        }
        persistence
    }

    /// Replace the stored snapshot without recording a save, as an outside
    /// writer would.
    pub fn set_stored(&self, snapshot: Snapshot) {
        self.inner.lock().settings.kvdata = snapshot;
    }

    /// Currently stored snapshot.
    pub fn stored(&self) -> Snapshot {
        self.inner.lock().settings.kvdata.clone()
    }

    /// Snapshots written through `save_snapshot`, oldest first.
    pub fn saves(&self) -> Vec<Snapshot> {
        self.inner.lock().saves.clone()
    }

    /// Snapshots written through `rewrite_snapshot`, oldest first.
    pub fn rewrites(&self) -> Vec<Snapshot> {
        self.inner.lock().rewrites.clone()
    }

    /// Make every snapshot write fail with `reason` until cleared.
    pub fn fail_saves(&self, reason: Option<&str>) {
        self.inner.lock().fail_saves = reason.map(str::to_string);
    }

    fn record(&self, snapshot: &Snapshot, rewrite: bool) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock();
        if let Some(reason) = &inner.fail_saves {
            return Err(PersistenceError::Injected(reason.clone()));
        }
        inner.settings.kvdata = snapshot.clone();
        if rewrite {
            inner.rewrites.push(snapshot.clone());
        } else {
            inner.saves.push(snapshot.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceBridge for MemoryPersistence {
    async fn load_snapshot(&self) -> Result<Snapshot, PersistenceError> {
        Ok(self.stored())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        self.record(snapshot, false)
    }

    async fn rewrite_snapshot(&self, snapshot: &Snapshot) -> Result<(), PersistenceError> {
        self.record(snapshot, true)
    }

    async fn load_endpoint(&self) -> Result<String, PersistenceError> {
        Ok(self.inner.lock().settings.serverurl.clone())
    }

    async fn save_endpoint(&self, endpoint: &str) -> Result<(), PersistenceError> {
        self.inner.lock().settings.serverurl = endpoint.to_string();
        Ok(())
    }
}
