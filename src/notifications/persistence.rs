//! File persistence for the notification map.
//!
//! Notifications are non-critical state: saves are debounced and coalesced,
//! and losing the last debounce window on an unclean exit is acceptable.
//! Callers that need durability (shutdown) use `save_immediate`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::models::NotificationRecord;

/// Fixed debounce window for coalesced saves.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(1000);

#[cfg(unix)]
const DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Debounced, coalesced writer for the notification map.
///
/// Each `save` replaces the pending payload and re-arms a single timer; all
/// calls within a window share one completion channel and collapse into one
/// disk write.
pub struct NotificationFile {
    path: PathBuf,
    debounce: Duration,
    state: Arc<Mutex<FlushState>>,
}

#[derive(Default)]
struct FlushState {
    dirty: bool,
    /// Serialized JSON of the most recent map snapshot.
    payload: String,
    timer: Option<JoinHandle<()>>,
    /// Completion channel shared by every `save` in the current window.
    done: Option<(watch::Sender<bool>, watch::Receiver<bool>)>,
}

impl NotificationFile {
    pub fn new(path: PathBuf) -> Self {
        Self::with_debounce(path, SAVE_DEBOUNCE)
    }

    /// Custom debounce window, for tests.
    pub fn with_debounce(path: PathBuf, debounce: Duration) -> Self {
        Self {
            path,
            debounce,
            state: Arc::new(Mutex::new(FlushState::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the backing file. A missing file means an empty map; a corrupt
    /// file is logged and also yields an empty map. Never fails the caller.
    pub async fn load(&self) -> BTreeMap<String, NotificationRecord> {
        if let Err(err) = self.ensure_parent_dir() {
            warn!("Failed to prepare notification data directory: {:#}", err);
            return BTreeMap::new();
        }

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No notification file at {:?}, starting empty", self.path);
                return BTreeMap::new();
            }
            Err(err) => {
                warn!("Failed to read {:?}: {}, starting empty", self.path, err);
                return BTreeMap::new();
            }
        };

        match serde_json::from_slice::<BTreeMap<String, NotificationRecord>>(&bytes) {
            Ok(map) => {
                info!("Loaded {} notifications from {:?}", map.len(), self.path);
                map
            }
            Err(err) => {
                warn!("Failed to parse {:?}: {}, starting empty", self.path, err);
                BTreeMap::new()
            }
        }
    }

    /// Fire-and-forget debounced save. Marks the data dirty, (re)arms the
    /// timer, and returns the completion channel for the upcoming flush;
    /// callers that await it are blocked until the next flush fires, not
    /// once per call.
    pub fn save(&self, records: &BTreeMap<String, NotificationRecord>) -> watch::Receiver<bool> {
        let payload = serialize(records);

        let mut state = self.state.lock().unwrap();
        state.payload = payload;
        state.dirty = true;

        // Re-arm: drop the pending timer and start the window over.
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let rx = match &state.done {
            Some((_, rx)) => rx.clone(),
            None => {
                let (tx, rx) = watch::channel(false);
                state.done = Some((tx, rx.clone()));
                rx
            }
        };

        let path = self.path.clone();
        let shared = self.state.clone();
        let debounce = self.debounce;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            flush(&path, &shared).await;
        }));

        rx
    }

    /// Cancel any pending timer and flush right away, but only if dirty.
    /// Used on graceful shutdown so the last debounce window is not lost.
    /// Returns true if a write was performed.
    pub async fn save_immediate(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            if !state.dirty {
                return false;
            }
        }
        flush(&self.path, &self.state).await
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        let Some(dir) = self.path.parent() else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating notification data directory {:?}", dir))?;
        restrict_permissions(dir, true);
        Ok(())
    }
}

/// Write the pending payload if still dirty. Clears the dirty flag before
/// the write and restores it on failure so the next window retries.
async fn flush(path: &Path, shared: &Arc<Mutex<FlushState>>) -> bool {
    let (payload, done) = {
        let mut state = shared.lock().unwrap();
        state.timer = None;
        if !state.dirty {
            if let Some((tx, _)) = state.done.take() {
                let _ = tx.send(true);
            }
            return false;
        }
        state.dirty = false;
        (state.payload.clone(), state.done.take())
    };

    match tokio::fs::write(path, payload.as_bytes()).await {
        Ok(()) => {
            restrict_permissions(path, false);
            debug!("Flushed notifications to {:?}", path);
        }
        Err(err) => {
            warn!("Failed to write notifications to {:?}: {}", path, err);
            let mut state = shared.lock().unwrap();
            // Keep dirty only if no newer payload arrived meanwhile.
            if !state.dirty {
                state.dirty = true;
                state.payload = payload;
            }
        }
    }

    if let Some((tx, _)) = done {
        let _ = tx.send(true);
    }
    true
}

fn serialize(records: &BTreeMap<String, NotificationRecord>) -> String {
    // Pretty in development builds, compact in production.
    let result = if cfg!(debug_assertions) {
        serde_json::to_string_pretty(records)
    } else {
        serde_json::to_string(records)
    };
    // BTreeMap<String, _> with serializable values cannot fail to serialize.
    result.unwrap_or_else(|_| "{}".to_string())
}

/// Owner-only permissions. Failures are logged, never fatal.
#[cfg(unix)]
fn restrict_permissions(path: &Path, is_dir: bool) {
    use std::os::unix::fs::PermissionsExt;
    let mode = if is_dir { DIR_MODE } else { FILE_MODE };
    if let Err(err) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        warn!("Failed to set permissions on {:?}: {}", path, err);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _is_dir: bool) {}
