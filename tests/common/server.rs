//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own data directory.

use super::constants::*;
use agent_notify_server::notifications::{NotificationFile, NotificationStore};
use agent_notify_server::server::stream::{StreamLimits, StreamManager};
use agent_notify_server::server::{make_app, RequestsLoggingLevel, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance with an isolated store and data directory
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Store handle for direct access in tests
    pub store: Arc<NotificationStore>,

    /// Path of the notifications file backing the store
    pub notifications_path: std::path::PathBuf,

    // Private fields - keep resources alive until drop
    _temp_data_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port with default limits
    pub async fn spawn() -> Self {
        Self::spawn_with_limits(StreamLimits::default(), Duration::from_secs(30)).await
    }

    /// Spawns a new test server with custom stream limits and keepalive
    ///
    /// This function:
    /// 1. Creates a temporary data directory and an empty store
    /// 2. Binds to a random port (127.0.0.1:0)
    /// 3. Spawns the server in a background task
    /// 4. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if port binding fails or the server doesn't become ready
    /// within the timeout.
    pub async fn spawn_with_limits(limits: StreamLimits, keepalive: Duration) -> Self {
        let temp_data_dir = TempDir::new().expect("Failed to create temp data dir");
        let notifications_path = temp_data_dir.path().join("notifications.json");

        let file = NotificationFile::with_debounce(
            notifications_path.clone(),
            Duration::from_millis(TEST_SAVE_DEBOUNCE_MS),
        );
        let store = Arc::new(NotificationStore::new(
            file,
            TEST_MAX_COUNT,
            Duration::from_secs(TEST_TTL_SECS),
        ));
        store.load().await;

        let stream_manager = Arc::new(StreamManager::new(limits));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");

        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let base_url = format!("http://127.0.0.1:{}", port);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            keepalive_interval: keepalive,
        };

        let app = make_app(config, store.clone(), stream_manager);

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
            .expect("Server failed");
        });

        // Wait for server to be ready
        let server = Self {
            base_url,
            port,
            store,
            notifications_path,
            _temp_data_dir: temp_data_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the / endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    // Server is ready
                    return;
                }
                _ => {
                    // Server not ready yet, wait and retry
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
