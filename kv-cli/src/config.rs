//! Configuration loading for the sharedkv CLI.
//!
//! Tuning is read from a TOML file (default: `sharedkv.toml` in the
//! platform config directory). A missing file means all defaults.

use serde::Deserialize;
use sharedkv_client::{ChannelConfig, EchoPolicy, SupervisorConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CliConfig {
    /// Sync behaviour.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Live session behaviour.
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Sync configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Delay before reconnecting after a failure (default: 1000).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// What to do with our own changes reflected by the relay.
    #[serde(default)]
    pub echo_policy: EchoPolicySetting,
    /// Tag outbound changes with this process's origin id (default: false).
    #[serde(default)]
    pub tag_origin: bool,
    /// How long `--publish` waits for the relay connection (default: 5000).
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

/// Echo policy as spelled in the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EchoPolicySetting {
    /// Drop reflected changes.
    #[default]
    Discard,
    /// Apply reflected changes again.
    Apply,
}

/// Watch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Quiet period for external file edits (default: 500).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How often the settings file is checked for edits (default: 250).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

// Default value functions
fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            echo_policy: EchoPolicySetting::default(),
            tag_origin: false,
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl CliConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Like [`CliConfig::from_file`], but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Supervisor settings derived from the `[sync]` section.
    pub fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            retry_delay: Duration::from_millis(self.sync.retry_delay_ms),
            channel: ChannelConfig {
                echo_policy: match self.sync.echo_policy {
                    EchoPolicySetting::Discard => EchoPolicy::Discard,
                    EchoPolicySetting::Apply => EchoPolicy::Apply,
                },
                tag_origin: self.sync.tag_origin,
            },
            start_online: true,
        }
    }

    /// Quiet period for the external change watcher.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.watch.debounce_ms)
    }

    /// Settings file poll interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watch.poll_interval_ms.max(1))
    }

    /// Connection wait for one-shot publishes.
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.publish_timeout_ms)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
