//! CLI command implementations.

pub mod delete;
pub mod endpoint;
pub mod get;
pub mod list;
pub mod set;
pub mod status;
pub mod transfer;
pub mod watch;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sharedkv_client::{
    ConnectivitySupervisor, JsonFilePersistence, PersistenceBridge, SharedKv, WebSocketTransport,
};
use sharedkv_core::Phase;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::CliConfig;

/// Store and settings shared by every command.
pub struct Session {
    /// Settings file path.
    pub settings: PathBuf,
    /// Persistence backed by the settings file.
    pub persistence: Arc<JsonFilePersistence>,
    /// The store.
    pub kv: SharedKv,
    /// CLI configuration.
    pub config: CliConfig,
}

impl Session {
    /// Load the store from `settings`.
    pub async fn open(settings: PathBuf, config: CliConfig) -> Result<Self> {
        let persistence = Arc::new(JsonFilePersistence::new(&settings));
        let kv = SharedKv::open(persistence.clone())
            .await
            .with_context(|| format!("Failed to load settings {}", settings.display()))?;
        Ok(Self {
            settings,
            persistence,
            kv,
            config,
        })
    }

    /// Configured endpoint, empty when sync is disabled.
    pub async fn endpoint(&self) -> Result<String> {
        self.persistence
            .load_endpoint()
            .await
            .context("Failed to read endpoint")
    }

    /// Start supervising sync against `endpoint`.
    pub fn supervise(&self, endpoint: &str) -> ConnectivitySupervisor {
        ConnectivitySupervisor::spawn(
            self.kv.clone(),
            endpoint,
            WebSocketTransport::new,
            self.config.supervisor(),
        )
    }

    /// Apply `edit` to the store, sending it to peers when `publish` is set.
    ///
    /// The edit is always saved locally. Publishing fails if no endpoint is
    /// configured or the relay cannot be reached in time.
    pub async fn edit<F>(&self, publish: bool, edit: F) -> Result<()>
    where
        F: FnOnce(&SharedKv) -> Result<()>,
    {
        if !publish {
            return edit(&self.kv);
        }

        let endpoint = self.endpoint().await?;
        if endpoint.is_empty() {
            bail!("No endpoint configured. Run 'sharedkv endpoint <url>' first.");
        }

        let supervisor = self.supervise(&endpoint);
        let mut status = supervisor.watch_status();
        let opened = tokio::time::timeout(
            self.config.publish_timeout(),
            status.wait_for(|s| s.phase == Phase::Open),
        )
        .await
        .is_ok_and(|waited| waited.is_ok());

        let result = edit(&self.kv);
        supervisor.shutdown().await;
        result?;

        if !opened {
            bail!("Saved locally but not published: could not reach {endpoint}");
        }
        Ok(())
    }

    /// Wait for pending writes to reach the settings file.
    pub async fn close(&self) {
        self.kv.flush().await;
    }
}

/// Interpret a command-line value: JSON if it parses, otherwise a string.
pub fn parse_value(text: &str, raw: bool) -> Value {
    if raw {
        return Value::String(text.to_string());
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Render a value on one line.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_parse_as_json_when_possible() {
        assert_eq!(parse_value("42", false), json!(42));
        assert_eq!(parse_value("{\"a\":[1]}", false), json!({"a": [1]}));
        assert_eq!(parse_value("\"quoted\"", false), json!("quoted"));
        assert_eq!(parse_value("plain words", false), json!("plain words"));
    }

    #[test]
    fn raw_values_stay_strings() {
        assert_eq!(parse_value("42", true), json!("42"));
        assert_eq!(parse_value("null", true), json!("null"));
    }

    #[test]
    fn strings_render_unquoted() {
        assert_eq!(render(&json!("hi")), "hi");
        assert_eq!(render(&json!({"k": true})), r#"{"k":true}"#);
        assert_eq!(render(&json!(null)), "null");
    }
}
