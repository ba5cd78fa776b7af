//! Agent task notifications: store, derived index and file persistence.

mod index;
mod models;
mod persistence;
mod store;

pub use models::{
    now_ms, FolderNotification, NotificationRecord, NotificationStatus, NotificationUpdate,
    StoreEvent, StoreEventKind, StoreStats,
};
pub use persistence::{NotificationFile, SAVE_DEBOUNCE};
pub use store::{CleanupReport, NotificationStore, Subscription, DEFAULT_MAX_COUNT, DEFAULT_TTL};
