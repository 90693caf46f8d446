use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{has_errors, EngineConfig, WarnLevel};
use crate::engine::Engine;

pub const DEFAULT_POLL: Duration = Duration::from_millis(800);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Hot-reloads an engine when its config file changes on disk.
///
/// The file's mtime is polled; a new mtime must stay put for the debounce
/// window before the file is read, so editors that write in several steps
/// trigger a single reload. Files with error-level findings are skipped and
/// the engine keeps its current config.
pub struct ConfigWatcher {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Must be called from within a Tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>, engine: Engine) -> Self {
        Self::with_timing(path, engine, DEFAULT_POLL, DEFAULT_DEBOUNCE)
    }

    pub fn with_timing(
        path: impl Into<PathBuf>,
        engine: Engine,
        poll: Duration,
        debounce: Duration,
    ) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(watch_loop(path.into(), engine, poll, debounce, stop_rx));
        Self { stop, task }
    }

    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "config watcher ended abnormally");
        }
    }
}

async fn modified(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}

async fn watch_loop(
    path: PathBuf,
    engine: Engine,
    poll: Duration,
    debounce: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut applied = modified(&path).await;
    let mut pending: Option<(SystemTime, Instant)> = None;
    debug!(path = %path.display(), "watching config");

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll) => {}
        }

        let Some(current) = modified(&path).await else {
            continue;
        };
        if applied == Some(current) {
            pending = None;
            continue;
        }
        match pending {
            Some((seen, since)) if seen == current => {
                if since.elapsed() >= debounce {
                    apply(&path, &engine).await;
                    applied = Some(current);
                    pending = None;
                }
            }
            _ => pending = Some((current, Instant::now())),
        }
    }
}

async fn apply(path: &Path, engine: &Engine) {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config reload: read failed");
            return;
        }
    };
    let config = match EngineConfig::from_yaml(&data) {
        Ok(config) => config,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config reload: parse failed");
            return;
        }
    };

    let warnings = config.validate();
    for w in &warnings {
        match w.level {
            WarnLevel::Warning => warn!(message = %w.message, "config warning"),
            WarnLevel::Error => warn!(message = %w.message, "config error"),
        }
    }
    if has_errors(&warnings) {
        warn!(path = %path.display(), "config reload skipped");
        return;
    }

    match engine.reload(config) {
        Ok(()) => info!(path = %path.display(), "config hot-reloaded"),
        Err(e) => warn!(path = %path.display(), error = %e, "config reload rejected"),
    }
}
