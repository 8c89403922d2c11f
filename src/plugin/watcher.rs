//! File watcher that triggers [`PluginManager::reload`] when a plugin's
//! on-disk state changes, debounced the same way capability hot-reload is.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Plugin, PluginManager};
use crate::Result;

const DEBOUNCE: Duration = Duration::from_millis(500);

/// A single plugin's watch path plus how to build its replacement instance
/// when a reload is triggered.
pub struct WatchTarget {
    /// Id of the plugin to reload, matching [`Plugin::id`].
    pub plugin_id: String,
    /// Path whose changes should trigger a reload (a file or directory).
    pub path: PathBuf,
    /// Builds a fresh plugin instance to hand to [`PluginManager::reload`].
    pub factory: Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>,
}

/// Watches each [`WatchTarget`] and hot-reloads the matching plugin on change.
pub struct PluginWatcher {
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

impl PluginWatcher {
    /// Start watching `targets`. Returns immediately; reloads happen on a
    /// spawned background task until `shutdown_rx` fires.
    pub fn start(manager: Arc<PluginManager>, targets: Vec<WatchTarget>, shutdown_rx: tokio::sync::broadcast::Receiver<()>) -> Result<Self> {
        if targets.is_empty() {
            info!("no plugin watch targets configured");
            return Ok(Self { _watcher: Mutex::new(None) });
        }

        let (event_tx, event_rx) = mpsc::channel(100);
        let watcher = Self::create_watcher(event_tx, &targets)?;
        Self::spawn_reload_task(manager, targets, event_rx, shutdown_rx);

        Ok(Self { _watcher: Mutex::new(Some(watcher)) })
    }

    fn create_watcher(event_tx: mpsc::Sender<String>, targets: &[WatchTarget]) -> Result<RecommendedWatcher> {
        let watched_paths: Vec<(PathBuf, String)> = targets.iter().map(|t| (t.path.clone(), t.plugin_id.clone())).collect();

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                        return;
                    }
                    for changed in &event.paths {
                        for (watched_path, plugin_id) in &watched_paths {
                            if changed.starts_with(watched_path) || changed == watched_path {
                                debug!(plugin = %plugin_id, path = ?changed, "plugin watch path changed");
                                let _ = event_tx.try_send(plugin_id.clone());
                            }
                        }
                    }
                }
                Err(e) => error!(error = %e, "plugin file watcher error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )
        .map_err(|e| crate::Error::internal(format!("failed to create plugin watcher: {e}")))?;

        for target in targets {
            if target.path.exists() {
                if let Err(e) = watcher.watch(&target.path, RecursiveMode::Recursive) {
                    warn!(plugin = %target.plugin_id, error = %e, "failed to watch plugin path");
                } else {
                    info!(plugin = %target.plugin_id, path = ?target.path, "watching plugin for hot-reload");
                }
            }
        }

        Ok(watcher)
    }

    fn spawn_reload_task(
        manager: Arc<PluginManager>,
        targets: Vec<WatchTarget>,
        mut event_rx: mpsc::Receiver<String>,
        mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    ) {
        tokio::spawn(async move {
            let mut last_event: Option<Instant> = None;
            let mut pending: Option<String> = None;
            let mut interval = tokio::time::interval(Duration::from_millis(100));

            loop {
                tokio::select! {
                    Some(plugin_id) = event_rx.recv() => {
                        last_event = Some(Instant::now());
                        pending = Some(plugin_id);
                    }
                    _ = interval.tick() => {
                        if let (Some(plugin_id), Some(last)) = (pending.clone(), last_event) {
                            if last.elapsed() >= DEBOUNCE {
                                pending = None;
                                last_event = None;

                                let Some(target) = targets.iter().find(|t| t.plugin_id == plugin_id) else {
                                    continue;
                                };
                                info!(plugin = %plugin_id, "hot-reloading plugin from disk change");
                                let replacement = (target.factory)();
                                if let Err(e) = manager.reload(&plugin_id, replacement).await {
                                    error!(plugin = %plugin_id, error = %e, "plugin hot-reload failed");
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("plugin watcher shutting down");
                        break;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceRegistry;

    #[tokio::test]
    async fn start_with_no_targets_does_not_spawn_watcher() {
        let manager = Arc::new(PluginManager::new(Arc::new(ServiceRegistry::new())));
        let (_tx, rx) = tokio::sync::broadcast::channel(1);
        let watcher = PluginWatcher::start(manager, vec![], rx).unwrap();
        assert!(watcher._watcher.lock().is_none());
    }
}
