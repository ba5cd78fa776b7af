//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all notification-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// HTTP test client
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Notification Endpoints
    // ========================================================================

    /// POST /v1/notifications with just the required fields
    pub async fn set_notification(&self, folder: &str, message: &str, status: &str) -> Response {
        self.set_notification_body(json!({
            "folder": folder,
            "message": message,
            "status": status,
        }))
        .await
    }

    /// POST /v1/notifications with an arbitrary body
    pub async fn set_notification_body(&self, body: serde_json::Value) -> Response {
        self.client
            .post(format!("{}/v1/notifications", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Set notification request failed")
    }

    /// GET /v1/notifications, optionally filtered to one folder
    pub async fn get_notifications(&self, folder: Option<&str>) -> Response {
        let mut request = self
            .client
            .get(format!("{}/v1/notifications", self.base_url));
        if let Some(folder) = folder {
            request = request.query(&[("folder", folder)]);
        }
        request.send().await.expect("Get notifications failed")
    }

    /// GET /v1/notifications/all
    pub async fn get_all_notifications(&self) -> Response {
        self.client
            .get(format!("{}/v1/notifications/all", self.base_url))
            .send()
            .await
            .expect("Get all notifications failed")
    }

    /// POST /v1/notifications/read
    pub async fn mark_notification_read(&self, folder: &str) -> Response {
        self.client
            .post(format!("{}/v1/notifications/read", self.base_url))
            .json(&json!({ "folder": folder }))
            .send()
            .await
            .expect("Mark read request failed")
    }

    /// DELETE /v1/notifications, optionally scoped to one folder
    pub async fn delete_notifications(&self, folder: Option<&str>) -> Response {
        let mut request = self
            .client
            .delete(format!("{}/v1/notifications", self.base_url));
        if let Some(folder) = folder {
            request = request.query(&[("folder", folder)]);
        }
        request.send().await.expect("Delete notifications failed")
    }

    /// GET /v1/notifications/stats
    pub async fn get_stats(&self) -> Response {
        self.client
            .get(format!("{}/v1/notifications/stats", self.base_url))
            .send()
            .await
            .expect("Get stats failed")
    }

    // ========================================================================
    // Streaming
    // ========================================================================

    /// GET /v1/notifications/stream for one folder
    ///
    /// Returns the raw response; use `bytes_stream()` on it to read frames.
    /// Built without the default timeout since streams stay open.
    pub async fn open_stream(&self, folder: &str) -> Response {
        reqwest::Client::new()
            .get(format!("{}/v1/notifications/stream", self.base_url))
            .query(&[("folder", folder)])
            .send()
            .await
            .expect("Open stream request failed")
    }
}
