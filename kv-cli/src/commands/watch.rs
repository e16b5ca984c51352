//! Live sync session.
//!
//! Keeps a supervised channel to the configured endpoint and polls the
//! settings file. When another process edits the file, the store is
//! reloaded (debounced) and an endpoint change is applied on the fly.

use anyhow::Result;
use sharedkv_client::{ChangeSource, StoreEvent};
use sharedkv_core::LinkNotice;
use std::path::Path;
use std::time::SystemTime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::{render, Session};

/// Run the watch command until Ctrl-C.
pub async fn run(session: &Session) -> Result<()> {
    let mut endpoint = session.endpoint().await?;
    let supervisor = session.supervise(&endpoint);
    let watcher = session.kv.external_change_watcher(session.config.debounce());
    let mut notices = supervisor.subscribe();
    let mut events = session.kv.subscribe();
    let mut poll = tokio::time::interval(session.config.poll_interval());
    let mut last_modified = modified(&session.settings).await;

    println!("Watching {} (Ctrl-C to stop)", session.settings.display());
    if endpoint.is_empty() {
        println!("Sync disabled; only reloading on file edits");
    } else {
        println!("Syncing with {endpoint}");
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,

            _ = poll.tick() => {
                let current = modified(&session.settings).await;
                if current == last_modified {
                    continue;
                }
                last_modified = current;

                let settings = match session.persistence.load_settings().await {
                    Ok(settings) => settings,
                    Err(e) => {
                        warn!(error = %e, "settings file unreadable; keeping current store");
                        continue;
                    }
                };
                if settings.serverurl.trim() != endpoint {
                    endpoint = settings.serverurl.trim().to_string();
                    println!("Endpoint changed to {}", display_endpoint(&endpoint));
                    supervisor.set_endpoint(endpoint.clone());
                }
                // Our own saves touch the file too. IndexMap equality ignores order.
                if !settings.kvdata.iter().eq(session.kv.snapshot().iter()) {
                    watcher.trigger();
                } else {
                    debug!("settings file matches memory");
                }
            }

            notice = notices.recv() => match notice {
                Ok(notice) => print_notice(&notice),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },

            event = events.recv() => match event {
                Ok(StoreEvent::Changed { key, source: ChangeSource::Remote }) => {
                    match session.kv.get(&key) {
                        Some(value) => println!("<- {key} = {}", render(&value)),
                        None => println!("<- {key} deleted"),
                    }
                }
                Ok(StoreEvent::Reloaded) => {
                    println!("Reloaded from file ({} entries)", session.kv.len());
                }
                Ok(StoreEvent::PersistenceFailed { error }) => {
                    eprintln!("Failed to save: {error}");
                }
                Ok(StoreEvent::Changed { .. }) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    println!("Stopping");
    watcher.cancel();
    supervisor.shutdown().await;
    Ok(())
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .and_then(|meta| meta.modified())
        .ok()
}

fn display_endpoint(endpoint: &str) -> &str {
    if endpoint.is_empty() {
        "(disabled)"
    } else {
        endpoint
    }
}

fn print_notice(notice: &LinkNotice) {
    match notice {
        LinkNotice::Connected => println!("Connected"),
        LinkNotice::ConnectFailed { attempt, error } => {
            println!("Connect attempt {attempt} failed: {error}")
        }
        LinkNotice::Disconnected { reason } => println!("Disconnected: {reason}"),
        LinkNotice::Stopped => {}
    }
}
