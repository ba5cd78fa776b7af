//! Notification data models

use serde::{Deserialize, Serialize};

/// Lifecycle status of the background task a notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Working,
    Completed,
}

/// One notification per folder. Writing the same folder again replaces the
/// previous record (last write wins, no versioning).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub message: String,
    /// Wall-clock milliseconds at creation/update time.
    pub timestamp: i64,
    pub unread: bool,
    pub status: NotificationStatus,
    /// Opaque payload, size- and depth-limited by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Partial record merged into the store by `NotificationStore::set`.
///
/// `timestamp` defaults to now and `unread` to true unless supplied.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationUpdate {
    pub message: String,
    pub status: NotificationStatus,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub unread: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreEventKind {
    Created,
    Updated,
    Removed,
}

/// Event published synchronously to subscribers on every visible mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreEvent {
    #[serde(rename = "type")]
    pub kind: StoreEventKind,
    pub folder: String,
    /// Present for created/updated, absent for removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<NotificationRecord>,
}

/// A record paired with its folder key, for list responses.
#[derive(Debug, Clone, Serialize)]
pub struct FolderNotification {
    pub folder: String,
    #[serde(flatten)]
    pub record: NotificationRecord,
}

/// Snapshot of store health, used by the stats route and tests.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: usize,
    /// Size of the unread-and-completed set (the "pending" view).
    pub unread: usize,
    /// Age in milliseconds of the oldest record, if any.
    pub oldest_age_ms: Option<i64>,
    pub max_count: usize,
    pub ttl_ms: i64,
    pub listeners: usize,
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
