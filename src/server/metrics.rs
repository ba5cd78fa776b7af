use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all server metrics
const PREFIX: &str = "agent_notify";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Notification Store Metrics
    pub static ref NOTIFICATIONS_SET_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_notifications_set_total"), "Notifications written, by status"),
        &["status"]
    ).expect("Failed to create notifications_set_total metric");

    pub static ref NOTIFICATIONS_LIVE: Gauge = Gauge::new(
        format!("{PREFIX}_notifications_live"),
        "Notification records currently held in the store"
    ).expect("Failed to create notifications_live metric");

    // Streaming Metrics
    pub static ref STREAMS_ACTIVE: Gauge = Gauge::new(
        format!("{PREFIX}_streams_active"),
        "Open event-stream connections"
    ).expect("Failed to create streams_active metric");

    pub static ref STREAMS_REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_streams_rejected_total"), "Stream admissions refused, by reason"),
        &["reason"]
    ).expect("Failed to create streams_rejected_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(NOTIFICATIONS_SET_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(NOTIFICATIONS_LIVE.clone()));
    let _ = REGISTRY.register(Box::new(STREAMS_ACTIVE.clone()));
    let _ = REGISTRY.register(Box::new(STREAMS_REJECTED_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_notification_set(status: &str) {
    NOTIFICATIONS_SET_TOTAL.with_label_values(&[status]).inc();
}

pub fn set_live_notifications(count: usize) {
    NOTIFICATIONS_LIVE.set(count as f64);
}

pub fn set_active_streams(count: usize) {
    STREAMS_ACTIVE.set(count as f64);
}

pub fn record_stream_rejected(reason: &str) {
    STREAMS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
}

/// Handler for the /metrics endpoint on the metrics port.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body).into_response(),
            Err(err) => {
                tracing::error!("Metrics buffer was not valid UTF-8: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(err) => {
            tracing::error!("Failed to encode metrics: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_record() {
        init_metrics();

        record_http_request("GET", "/v1/notifications", 200, Duration::from_millis(3));
        record_notification_set("completed");
        set_live_notifications(7);
        set_active_streams(2);
        record_stream_rejected("per_ip");

        assert_eq!(NOTIFICATIONS_LIVE.get(), 7.0);
        assert_eq!(STREAMS_ACTIVE.get(), 2.0);
        assert!(!REGISTRY.gather().is_empty());
    }
}
