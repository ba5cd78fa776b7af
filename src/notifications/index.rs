//! Derived views over the notification map.
//!
//! Keeps two queries O(1) that would otherwise scan the whole map: the
//! unread-and-completed set (the "what's pending" query) and the minimum
//! timestamp (the "age of oldest entry" query). Fed by every store mutation;
//! must never diverge from the authoritative map.

use std::collections::BTreeMap;

use super::models::{FolderNotification, NotificationRecord, NotificationStatus};

#[derive(Debug, Default)]
pub struct IndexCache {
    /// Folders whose record is both unread and completed.
    unread_completed: BTreeMap<String, NotificationRecord>,
    /// Minimum timestamp across ALL records, not just the indexed ones.
    min_timestamp: Option<i64>,
}

impl IndexCache {
    /// Full recomputation, used on bulk load and full clear.
    pub fn rebuild(&mut self, records: &BTreeMap<String, NotificationRecord>) {
        self.unread_completed = records
            .iter()
            .filter(|(_, r)| Self::is_pending(r))
            .map(|(folder, r)| (folder.clone(), r.clone()))
            .collect();
        self.min_timestamp = records.values().map(|r| r.timestamp).min();
    }

    /// Incremental patch for a single-record change. `record` is the new
    /// state (None if removed), `previous_timestamp` the timestamp of the
    /// record that was replaced or removed, if any.
    pub fn on_record_changed(
        &mut self,
        records: &BTreeMap<String, NotificationRecord>,
        folder: &str,
        record: Option<&NotificationRecord>,
        previous_timestamp: Option<i64>,
    ) {
        match record {
            Some(r) if Self::is_pending(r) => {
                self.unread_completed.insert(folder.to_string(), r.clone());
            }
            _ => {
                self.unread_completed.remove(folder);
            }
        }

        match record {
            Some(r) => {
                if self.min_timestamp.map_or(true, |min| r.timestamp <= min) {
                    // Cheap path: the new record is the new minimum.
                    self.min_timestamp = Some(r.timestamp);
                } else if previous_timestamp.is_some() && previous_timestamp == self.min_timestamp {
                    // The overwritten record may have held the minimum.
                    self.recompute_min(records);
                }
            }
            // A removal may have taken the minimum with it.
            None => self.recompute_min(records),
        }
    }

    /// Unread-and-completed records, newest first. O(1) for the
    /// single-folder case, O(k) in the pending set size otherwise.
    pub fn unread(&self, folder: Option<&str>) -> Vec<FolderNotification> {
        let mut entries: Vec<FolderNotification> = match folder {
            Some(folder) => self
                .unread_completed
                .get(folder)
                .map(|r| FolderNotification {
                    folder: folder.to_string(),
                    record: r.clone(),
                })
                .into_iter()
                .collect(),
            None => self
                .unread_completed
                .iter()
                .map(|(folder, r)| FolderNotification {
                    folder: folder.clone(),
                    record: r.clone(),
                })
                .collect(),
        };
        entries.sort_by(|a, b| b.record.timestamp.cmp(&a.record.timestamp));
        entries
    }

    pub fn unread_count(&self) -> usize {
        self.unread_completed.len()
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.min_timestamp
    }

    fn recompute_min(&mut self, records: &BTreeMap<String, NotificationRecord>) {
        self.min_timestamp = records.values().map(|r| r.timestamp).min();
    }

    fn is_pending(record: &NotificationRecord) -> bool {
        record.unread && record.status == NotificationStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timestamp: i64, unread: bool, status: NotificationStatus) -> NotificationRecord {
        NotificationRecord {
            message: "msg".to_string(),
            timestamp,
            unread,
            status,
            metadata: None,
        }
    }

    #[test]
    fn rebuild_filters_to_unread_completed() {
        let mut records = BTreeMap::new();
        records.insert("/a".to_string(), record(1, true, NotificationStatus::Completed));
        records.insert("/b".to_string(), record(2, false, NotificationStatus::Completed));
        records.insert("/c".to_string(), record(3, true, NotificationStatus::Working));

        let mut index = IndexCache::default();
        index.rebuild(&records);

        assert_eq!(index.unread_count(), 1);
        assert_eq!(index.unread(None)[0].folder, "/a");
        assert_eq!(index.oldest_timestamp(), Some(1));
    }

    #[test]
    fn unread_is_sorted_newest_first() {
        let mut records = BTreeMap::new();
        records.insert("/a".to_string(), record(10, true, NotificationStatus::Completed));
        records.insert("/b".to_string(), record(30, true, NotificationStatus::Completed));
        records.insert("/c".to_string(), record(20, true, NotificationStatus::Completed));

        let mut index = IndexCache::default();
        index.rebuild(&records);

        let folders: Vec<String> = index.unread(None).into_iter().map(|e| e.folder).collect();
        assert_eq!(folders, vec!["/b", "/c", "/a"]);
    }

    #[test]
    fn removal_triggers_min_rescan() {
        let mut records = BTreeMap::new();
        records.insert("/a".to_string(), record(5, true, NotificationStatus::Completed));
        records.insert("/b".to_string(), record(9, true, NotificationStatus::Completed));

        let mut index = IndexCache::default();
        index.rebuild(&records);
        assert_eq!(index.oldest_timestamp(), Some(5));

        records.remove("/a");
        index.on_record_changed(&records, "/a", None, Some(5));

        assert_eq!(index.oldest_timestamp(), Some(9));
        assert_eq!(index.unread_count(), 1);
    }

    #[test]
    fn overwrite_of_minimum_triggers_rescan() {
        let mut records = BTreeMap::new();
        records.insert("/a".to_string(), record(5, true, NotificationStatus::Completed));
        records.insert("/b".to_string(), record(9, true, NotificationStatus::Completed));

        let mut index = IndexCache::default();
        index.rebuild(&records);

        // /a gets rewritten with a newer timestamp; /b now holds the minimum
        let updated = record(20, true, NotificationStatus::Completed);
        records.insert("/a".to_string(), updated.clone());
        index.on_record_changed(&records, "/a", Some(&updated), Some(5));

        assert_eq!(index.oldest_timestamp(), Some(9));
    }

    #[test]
    fn mark_read_drops_from_pending_set() {
        let mut records = BTreeMap::new();
        records.insert("/a".to_string(), record(5, true, NotificationStatus::Completed));

        let mut index = IndexCache::default();
        index.rebuild(&records);
        assert_eq!(index.unread_count(), 1);

        let read = record(5, false, NotificationStatus::Completed);
        records.insert("/a".to_string(), read.clone());
        index.on_record_changed(&records, "/a", Some(&read), Some(5));

        assert_eq!(index.unread_count(), 0);
        assert_eq!(index.oldest_timestamp(), Some(5));
    }

    #[test]
    fn single_folder_query_hits_index_only() {
        let mut records = BTreeMap::new();
        records.insert("/a".to_string(), record(5, true, NotificationStatus::Completed));
        records.insert("/b".to_string(), record(9, true, NotificationStatus::Working));

        let mut index = IndexCache::default();
        index.rebuild(&records);

        assert_eq!(index.unread(Some("/a")).len(), 1);
        assert!(index.unread(Some("/b")).is_empty());
        assert!(index.unread(Some("/missing")).is_empty());
    }
}
