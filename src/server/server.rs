use anyhow::Result;
use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, info};

use crate::notifications::{FolderNotification, NotificationStore, NotificationUpdate, StoreStats};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::stream::{stream_notifications, StreamLimits, StreamManager, StreamStats};
use super::{log_requests, metrics, state::*, RequestsLoggingLevel, ServerConfig};

const MAX_FOLDER_LENGTH: usize = 256;
const MAX_MESSAGE_LENGTH: usize = 500;
const MAX_METADATA_BYTES: usize = 4096;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub hash: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

#[derive(Deserialize, Debug)]
struct SetNotificationBody {
    pub folder: String,
    #[serde(flatten)]
    pub update: NotificationUpdate,
}

#[derive(Deserialize, Debug)]
struct MarkReadBody {
    pub folder: String,
}

#[derive(Deserialize, Debug)]
struct FolderQuery {
    pub folder: Option<String>,
}

#[derive(Serialize)]
struct RemovedResponse {
    removed: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    uptime: String,
    store: StoreStats,
    streams: StreamStats,
}

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    code: &'static str,
    message: String,
}

fn bad_request(code: &'static str, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        status: StatusCode::BAD_REQUEST.as_u16(),
        code,
        message: message.into(),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// Folder keys are path-like strings supplied by clients, so they are
/// bounded and kept printable.
fn validate_folder(folder: &str) -> Result<(), Response> {
    if folder.is_empty() {
        return Err(bad_request("invalid_folder", "folder must not be empty"));
    }
    if folder.len() > MAX_FOLDER_LENGTH {
        return Err(bad_request(
            "invalid_folder",
            format!("folder must be at most {} bytes", MAX_FOLDER_LENGTH),
        ));
    }
    if folder.chars().any(char::is_control) {
        return Err(bad_request(
            "invalid_folder",
            "folder must not contain control characters",
        ));
    }
    Ok(())
}

fn validate_update(update: &NotificationUpdate) -> Result<(), Response> {
    if update.message.len() > MAX_MESSAGE_LENGTH {
        return Err(bad_request(
            "invalid_message",
            format!("message must be at most {} bytes", MAX_MESSAGE_LENGTH),
        ));
    }
    if let Some(metadata) = &update.metadata {
        if !metadata.is_object() {
            return Err(bad_request(
                "invalid_metadata",
                "metadata must be a JSON object",
            ));
        }
        let serialized = serde_json::to_string(metadata).unwrap_or_default();
        if serialized.len() > MAX_METADATA_BYTES {
            return Err(bad_request(
                "invalid_metadata",
                format!("metadata must be at most {} bytes", MAX_METADATA_BYTES),
            ));
        }
    }
    Ok(())
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    let stats = ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        hash: state.hash.clone(),
    };
    Json(stats)
}

async fn set_notification(
    State(store): State<GuardedNotificationStore>,
    Json(body): Json<SetNotificationBody>,
) -> Response {
    if let Err(response) = validate_folder(&body.folder) {
        return response;
    }
    if let Err(response) = validate_update(&body.update) {
        return response;
    }

    debug!("Setting notification for {}", body.folder);
    let record = store.set(&body.folder, body.update);

    metrics::record_notification_set(match record.status {
        crate::notifications::NotificationStatus::Working => "working",
        crate::notifications::NotificationStatus::Completed => "completed",
    });
    metrics::set_live_notifications(store.stats().total);

    Json(FolderNotification {
        folder: body.folder,
        record,
    })
    .into_response()
}

async fn get_notifications(
    State(store): State<GuardedNotificationStore>,
    Query(query): Query<FolderQuery>,
) -> Response {
    Json(store.unread(query.folder.as_deref())).into_response()
}

async fn get_all_notifications(State(store): State<GuardedNotificationStore>) -> Response {
    Json(store.get_all()).into_response()
}

async fn mark_notification_read(
    State(store): State<GuardedNotificationStore>,
    Json(body): Json<MarkReadBody>,
) -> Response {
    if store.mark_read(&body.folder) {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn delete_notifications(
    State(store): State<GuardedNotificationStore>,
    Query(query): Query<FolderQuery>,
) -> Response {
    let response = match query.folder.as_deref() {
        Some(folder) => {
            if store.remove(folder) {
                Json(RemovedResponse { removed: 1 }).into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
        None => {
            let removed = store.remove_all();
            Json(RemovedResponse { removed }).into_response()
        }
    };
    metrics::set_live_notifications(store.stats().total);
    response
}

async fn get_stats(State(state): State<ServerState>) -> Response {
    let stats = StatsResponse {
        uptime: format_uptime(state.start_time.elapsed()),
        store: state.store.stats(),
        streams: state.stream_manager.stats(),
    };
    Json(stats).into_response()
}

impl ServerState {
    fn new(
        config: ServerConfig,
        store: Arc<NotificationStore>,
        stream_manager: Arc<StreamManager>,
    ) -> ServerState {
        ServerState {
            config,
            start_time: Instant::now(),
            store,
            stream_manager,
            hash: env!("GIT_HASH").to_owned(),
        }
    }
}

pub fn make_app(
    config: ServerConfig,
    store: Arc<NotificationStore>,
    stream_manager: Arc<StreamManager>,
) -> Router {
    let state = ServerState::new(config, store, stream_manager);

    let notification_routes: Router = Router::new()
        .route("/", post(set_notification))
        .route("/", get(get_notifications))
        .route("/", delete(delete_notifications))
        .route("/all", get(get_all_notifications))
        .route("/read", post(mark_notification_read))
        .route("/stats", get(get_stats))
        .route("/stream", get(stream_notifications))
        .with_state(state.clone());

    let app: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone())
        .nest("/v1/notifications", notification_routes);

    app.layer(middleware::from_fn_with_state(state, log_requests))
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics::metrics_handler))
}

pub async fn run_server(
    store: Arc<NotificationStore>,
    requests_logging_level: RequestsLoggingLevel,
    port: u16,
    metrics_port: u16,
    limits: StreamLimits,
    keepalive_interval: Duration,
) -> Result<()> {
    let config = ServerConfig {
        port,
        requests_logging_level,
        keepalive_interval,
    };
    let stream_manager = Arc::new(StreamManager::new(limits));
    let app = make_app(config, store, stream_manager);

    let metrics_listener =
        tokio::net::TcpListener::bind(format!("127.0.0.1:{}", metrics_port)).await?;
    info!("Metrics listening on port {}", metrics_port);
    tokio::spawn(async move {
        if let Err(err) = axum::serve(metrics_listener, make_metrics_app()).await {
            tracing::error!("Metrics server stopped: {}", err);
        }
    });

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("Listening on port {}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        return;
    }
    info!("Shutdown signal received");
}
