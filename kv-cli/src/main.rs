//! # sharedkv
//!
//! Command-line host for a sharedkv store kept in a JSON settings file.
//!
//! ## Commands
//!
//! - `get`, `set`, `set-at`, `delete`, `list`: edit the store
//! - `import`, `export`: replace or dump the whole store as JSON
//! - `endpoint`: show or change the sync endpoint
//! - `status`: show settings, config and store size
//! - `watch`: run a live sync session until interrupted
//!
//! ## Example
//!
//! ```bash
//! # Point at a relay
//! sharedkv endpoint ws://localhost:8080
//!
//! # Keep this running: syncs with peers and reloads on file edits
//! sharedkv watch
//!
//! # In another shell, edit and publish to peers
//! sharedkv set greeting '"hello"' --publish
//! sharedkv set-at greeting '"hello"' 0
//! sharedkv list
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{delete, endpoint, get, list, set, status, transfer, watch, Session};
use config::CliConfig;

/// Command-line host for sharedkv stores.
#[derive(Parser, Debug)]
#[command(name = "sharedkv")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file holding the store and the endpoint
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// TOML config file (sync and watch tuning)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// Key to look up
        key: String,
    },

    /// Set a key (JSON value; anything that is not JSON is stored as a string)
    Set {
        /// Key to set
        key: String,
        /// Value as JSON
        value: String,
        /// Store the value as a plain string without parsing
        #[arg(long)]
        raw: bool,
        /// Also send the change to peers on the configured endpoint
        #[arg(long)]
        publish: bool,
    },

    /// Set a key and move it to a position (local only, never sent)
    SetAt {
        /// Key to set
        key: String,
        /// Value as JSON
        value: String,
        /// 0-based position in the resulting order
        position: usize,
        /// Store the value as a plain string without parsing
        #[arg(long)]
        raw: bool,
    },

    /// Delete a key
    Delete {
        /// Key to delete
        key: String,
        /// Also send the deletion to peers on the configured endpoint
        #[arg(long)]
        publish: bool,
    },

    /// List entries in store order
    List {
        /// Print the whole store as one JSON object
        #[arg(long)]
        json: bool,
    },

    /// Replace the whole store with a JSON object
    Import {
        /// File to read, or `-` for stdin
        file: PathBuf,
    },

    /// Write the whole store as a JSON object
    Export {
        /// File to write (default: stdout)
        file: Option<PathBuf>,
    },

    /// Show or change the sync endpoint
    Endpoint {
        /// New endpoint URL
        #[arg(conflicts_with = "clear")]
        url: Option<String>,
        /// Disable sync
        #[arg(long)]
        clear: bool,
    },

    /// Show settings, config and store summary
    Status,

    /// Run a live sync session until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match cli.settings {
        Some(path) => path,
        None => default_data_dir()?.join("data.json"),
    };
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_dir()?.join("sharedkv.toml"),
    };
    let config = CliConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    let session = Session::open(settings, config).await?;

    let outcome = match cli.command {
        Commands::Get { key } => get::run(&session, &key),
        Commands::Set {
            key,
            value,
            raw,
            publish,
        } => set::run(&session, &key, &value, raw, publish).await,
        Commands::SetAt {
            key,
            value,
            position,
            raw,
        } => set::run_at(&session, &key, &value, position, raw).await,
        Commands::Delete { key, publish } => delete::run(&session, &key, publish).await,
        Commands::List { json } => list::run(&session, json),
        Commands::Import { file } => transfer::import(&session, &file).await,
        Commands::Export { file } => transfer::export(&session, file.as_deref()).await,
        Commands::Endpoint { url, clear } => {
            let new = if clear { Some(String::new()) } else { url };
            endpoint::run(&session, new).await
        }
        Commands::Status => status::run(&session, &config_path).await,
        Commands::Watch => watch::run(&session).await,
    };

    // Queued saves must land even when the command failed after editing.
    session.close().await;
    outcome
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("io", "sharedkv", "sharedkv")
        .context("Could not determine home directory")
}

/// Default directory for the settings file.
fn default_data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Default directory for `sharedkv.toml`.
fn default_config_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}
