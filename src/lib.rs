//! Agent Notify Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod notifications;
pub mod server;

// Re-export commonly used types for convenience
pub use notifications::{NotificationFile, NotificationStore};
pub use server::{make_app, run_server, RequestsLoggingLevel};
