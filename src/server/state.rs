use axum::extract::FromRef;

use crate::notifications::NotificationStore;
use std::sync::Arc;
use std::time::Instant;

use super::stream::StreamManager;
use super::ServerConfig;

pub type GuardedNotificationStore = Arc<NotificationStore>;
pub type GuardedStreamManager = Arc<StreamManager>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub store: GuardedNotificationStore,
    pub stream_manager: GuardedStreamManager,
    pub hash: String,
}

impl FromRef<ServerState> for GuardedNotificationStore {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}

impl FromRef<ServerState> for GuardedStreamManager {
    fn from_ref(input: &ServerState) -> Self {
        input.stream_manager.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
