//! Configuration file watcher for hot reload.
//!
//! Editors and `notify` report a single save as a burst of modify/create
//! events. The watcher collapses each burst into one reload, taken once the
//! file has been quiet for the debounce window.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time;

use crate::config::loader::load_config;
use crate::config::schema::DispatchConfig;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Monitors the configuration file and emits validated replacements.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<DispatchConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<DispatchConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                debounce: DEFAULT_DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a Tokio runtime; the returned
    /// handle must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let (change_tx, change_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = change_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, debounce = ?self.debounce, "Config watcher started");
        tokio::spawn(reload_on_change(change_rx, self.path, self.debounce, self.update_tx));
        Ok(watcher)
    }
}

/// Reload once per burst of change notifications.
async fn reload_on_change(
    mut changes: mpsc::UnboundedReceiver<()>,
    path: PathBuf,
    debounce: Duration,
    updates: mpsc::UnboundedSender<DispatchConfig>,
) {
    while changes.recv().await.is_some() {
        let mut coalesced = 1usize;
        // Wait until no notification arrives for a full window.
        loop {
            match time::timeout(debounce, changes.recv()).await {
                Ok(Some(())) => coalesced += 1,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        tracing::debug!(path = ?path, coalesced, "Config file change detected, reloading");
        match load_config(&path) {
            Ok(config) => {
                if updates.send(config).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
            }
        }
    }
}
