//! Authoritative in-memory notification store.
//!
//! Owns the folder -> record map, its derived index, bounded-size eviction,
//! TTL cleanup and the subscriber fan-out consumed by the streaming layer.
//! The map lives behind one interior mutex since mutations arrive from
//! arbitrary request-handler threads; cleanup additionally goes through a
//! try-enter gate so a periodic timer and ad hoc callers never interleave
//! their scan-and-delete passes.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::index::IndexCache;
use super::models::{
    now_ms, FolderNotification, NotificationRecord, NotificationUpdate, StoreEvent, StoreEventKind,
    StoreStats,
};
use super::persistence::NotificationFile;

pub const DEFAULT_MAX_COUNT: usize = 1000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

pub struct NotificationStore {
    inner: Arc<Mutex<StoreInner>>,
    /// Try-enter gate: at most one cleanup pass at a time, concurrent
    /// callers return immediately reporting zero work.
    cleanup_running: AtomicBool,
    file: NotificationFile,
    max_count: usize,
    ttl_ms: i64,
}

struct StoreInner {
    records: BTreeMap<String, NotificationRecord>,
    index: IndexCache,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

/// Registered listener handle. Dropping it unsubscribes; events published
/// after the drop are no longer delivered.
pub struct Subscription {
    inner: Weak<Mutex<StoreInner>>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().unwrap();
            let id = self.id;
            inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        }
    }
}

/// Outcome of a cleanup pass. A pass that lost the try-enter race reports
/// zero work with `ran == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub ran: bool,
    pub expired: usize,
    pub evicted: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }

    fn skipped() -> Self {
        Self {
            ran: false,
            expired: 0,
            evicted: 0,
        }
    }
}

impl NotificationStore {
    pub fn new(file: NotificationFile, max_count: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                records: BTreeMap::new(),
                index: IndexCache::default(),
                listeners: Vec::new(),
                next_listener_id: 0,
            })),
            cleanup_running: AtomicBool::new(false),
            file,
            max_count,
            ttl_ms: ttl.as_millis() as i64,
        }
    }

    /// Replace the in-memory map with the persisted one and rebuild the
    /// index. Missing or unreadable backing files yield an empty store.
    pub async fn load(&self) {
        let records = self.file.load().await;
        let mut inner = self.inner.lock().unwrap();
        inner.records = records;
        let StoreInner { records, index, .. } = &mut *inner;
        index.rebuild(records);
    }

    /// Merge `update` into the record for `folder`, creating it if absent.
    /// Enforces the size bound (silently evicting the globally oldest
    /// records), schedules a debounced persist, then publishes a
    /// created/updated event to all subscribers before returning.
    pub fn set(&self, folder: &str, update: NotificationUpdate) -> NotificationRecord {
        let record = NotificationRecord {
            message: update.message,
            timestamp: update.timestamp.unwrap_or_else(now_ms),
            unread: update.unread.unwrap_or(true),
            status: update.status,
            metadata: update.metadata,
        };

        let (kind, evicted) = {
            let mut inner = self.inner.lock().unwrap();
            let previous = inner.records.insert(folder.to_string(), record.clone());
            let kind = if previous.is_some() {
                StoreEventKind::Updated
            } else {
                StoreEventKind::Created
            };

            let StoreInner { records, index, .. } = &mut *inner;
            index.on_record_changed(
                records,
                folder,
                Some(&record),
                previous.map(|p| p.timestamp),
            );

            let evicted = Self::evict_over_capacity(&mut inner, self.max_count);
            self.file.save(&inner.records);
            (kind, evicted)
        };

        if evicted > 0 {
            debug!("Evicted {} oldest notifications over capacity", evicted);
        }

        self.publish(StoreEvent {
            kind,
            folder: folder.to_string(),
            record: Some(record.clone()),
        });

        record
    }

    /// Current record for a folder. Never blocks on I/O, never mutates.
    pub fn get(&self, folder: &str) -> Option<NotificationRecord> {
        self.inner.lock().unwrap().records.get(folder).cloned()
    }

    /// Full dump of the map, for admin/diagnostic use.
    pub fn get_all(&self) -> BTreeMap<String, NotificationRecord> {
        self.inner.lock().unwrap().records.clone()
    }

    /// Clear the unread flag. No-op (and no persist) if the folder is absent.
    /// Publishes no event; read-state changes are not streamed.
    pub fn mark_read(&self, folder: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(record) = inner.records.get_mut(folder) else {
            return false;
        };
        record.unread = false;
        let record = record.clone();
        let previous_timestamp = record.timestamp;

        let StoreInner { records, index, .. } = &mut *inner;
        index.on_record_changed(records, folder, Some(&record), Some(previous_timestamp));
        self.file.save(&inner.records);
        true
    }

    /// Delete one folder's record, publishing a removed event if it existed.
    pub fn remove(&self, folder: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let Some(previous) = inner.records.remove(folder) else {
                return false;
            };
            let StoreInner { records, index, .. } = &mut *inner;
            index.on_record_changed(records, folder, None, Some(previous.timestamp));
            self.file.save(&inner.records);
            true
        };

        self.publish(StoreEvent {
            kind: StoreEventKind::Removed,
            folder: folder.to_string(),
            record: None,
        });
        removed
    }

    /// Delete every record, publishing one removed event per folder so live
    /// streams can clear their state.
    pub fn remove_all(&self) -> usize {
        let folders: Vec<String> = {
            let mut inner = self.inner.lock().unwrap();
            let folders = std::mem::take(&mut inner.records);
            let StoreInner { records, index, .. } = &mut *inner;
            index.rebuild(records);
            self.file.save(records);
            folders.into_keys().collect()
        };

        for folder in &folders {
            self.publish(StoreEvent {
                kind: StoreEventKind::Removed,
                folder: folder.clone(),
                record: None,
            });
        }
        folders.len()
    }

    /// Unread-and-completed, non-expired records, newest first, optionally
    /// for one folder. Backed by the index cache, never a full-map scan.
    /// Records past their TTL are filtered out even before the next cleanup
    /// pass deletes them.
    pub fn unread(&self, folder: Option<&str>) -> Vec<FolderNotification> {
        let cutoff = now_ms() - self.ttl_ms;
        self.inner
            .lock()
            .unwrap()
            .index
            .unread(folder)
            .into_iter()
            .filter(|e| e.record.timestamp > cutoff)
            .collect()
    }

    /// Remove TTL-expired records plus any size excess in one pass.
    /// Expirations are silent: no events are published for them.
    pub fn cleanup(&self) -> CleanupReport {
        if self
            .cleanup_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CleanupReport::skipped();
        }

        let report = {
            let mut inner = self.inner.lock().unwrap();
            let cutoff = now_ms() - self.ttl_ms;
            let expired: Vec<String> = inner
                .records
                .iter()
                .filter(|(_, r)| r.timestamp <= cutoff)
                .map(|(folder, _)| folder.clone())
                .collect();

            for folder in &expired {
                let previous = inner.records.remove(folder);
                let StoreInner { records, index, .. } = &mut *inner;
                index.on_record_changed(records, folder, None, previous.map(|p| p.timestamp));
            }

            let evicted = Self::evict_over_capacity(&mut inner, self.max_count);

            let report = CleanupReport {
                ran: true,
                expired: expired.len(),
                evicted,
            };
            if report.removed() > 0 {
                self.file.save(&inner.records);
            }
            report
        };

        self.cleanup_running.store(false, Ordering::Release);

        if report.removed() > 0 {
            info!(
                "Cleanup removed {} notifications ({} expired, {} over capacity)",
                report.removed(),
                report.expired,
                report.evicted
            );
        }
        report
    }

    /// Register a listener, invoked synchronously in registration order for
    /// every published event. A panicking listener is isolated and logged;
    /// delivery continues with the remaining listeners.
    pub fn subscribe(&self, listener: impl Fn(&StoreEvent) + Send + Sync + 'static) -> Subscription {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        Subscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Schedule a debounced persist of the current map. Returns the shared
    /// completion channel for the upcoming flush.
    pub fn save(&self) -> watch::Receiver<bool> {
        let inner = self.inner.lock().unwrap();
        self.file.save(&inner.records)
    }

    /// Flush any pending save right away. Used on graceful shutdown.
    pub async fn save_immediate(&self) -> bool {
        self.file.save_immediate().await
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock().unwrap();
        StoreStats {
            total: inner.records.len(),
            unread: inner.index.unread_count(),
            oldest_age_ms: inner.index.oldest_timestamp().map(|ts| now_ms() - ts),
            max_count: self.max_count,
            ttl_ms: self.ttl_ms,
            listeners: inner.listeners.len(),
        }
    }

    /// Deliver an event to a snapshot of the listener table, outside the
    /// interior lock so listeners may re-enter the query API. Listeners
    /// registered during delivery do not see the in-flight event.
    fn publish(&self, event: StoreEvent) {
        let listeners: Vec<(u64, Listener)> = {
            let inner = self.inner.lock().unwrap();
            inner.listeners.clone()
        };

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!("Notification listener {} panicked during delivery", id);
            }
        }
    }

    /// Drop the globally oldest records (ties broken by folder order) until
    /// the map is back at capacity. Evictions publish no events.
    fn evict_over_capacity(inner: &mut StoreInner, max_count: usize) -> usize {
        let mut evicted = 0;
        while inner.records.len() > max_count {
            let Some(oldest) = inner
                .records
                .iter()
                .min_by_key(|(_, r)| r.timestamp)
                .map(|(folder, _)| folder.clone())
            else {
                break;
            };
            let previous = inner.records.remove(&oldest);
            let StoreInner { records, index, .. } = &mut *inner;
            index.on_record_changed(records, &oldest, None, previous.map(|p| p.timestamp));
            evicted += 1;
        }
        evicted
    }
}
