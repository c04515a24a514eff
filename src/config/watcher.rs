//! Hot reload of the service table.
//!
//! File changes and SIGHUP both go through [`reload`], so a bad edit is
//! reported the same way and never replaces the running configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::GovernorConfig;

/// Load `path` again. `None` (and an error log) when it no longer parses or validates.
pub fn reload(path: &Path) -> Option<GovernorConfig> {
    match load_config(path) {
        Ok(config) => {
            tracing::info!(
                path = ?path,
                services = config.services.len(),
                unknown_service = ?config.unknown_service,
                "Configuration reloaded"
            );
            Some(config)
        }
        Err(e) => {
            tracing::error!(path = ?path, error = %e, "Reload failed, keeping current configuration");
            None
        }
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

/// Sends a freshly validated [`GovernorConfig`] whenever the file changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<GovernorConfig>,
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GovernorConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. Updates stop when the returned handle is dropped.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, update_tx } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_content_change(&event.kind) => {
                    if let Some(config) = reload(&watched) {
                        if update_tx.send(config).is_err() {
                            tracing::debug!("Config update receiver gone, dropping reload");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = ?path, "Watching configuration for service table changes");
        Ok(watcher)
    }
}
