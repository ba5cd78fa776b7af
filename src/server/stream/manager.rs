//! Stream admission control and connection bookkeeping.
//!
//! Tracks live event-stream connections per client IP and globally, and
//! decides accept/reject before any per-connection resource is allocated.
//! Slots are RAII guards, so teardown is exactly-once no matter how many
//! times (or how early) the disconnect signal fires.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::server::metrics;

pub const DEFAULT_MAX_PER_IP: usize = 5;
pub const DEFAULT_GLOBAL_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    pub max_per_ip: usize,
    pub global_limit: usize,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_per_ip: DEFAULT_MAX_PER_IP,
            global_limit: DEFAULT_GLOBAL_LIMIT,
        }
    }
}

/// Admission refused. No connection state exists when this is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("server connection capacity reached")]
    GlobalLimit,
    #[error("too many concurrent connections from this client")]
    PerIpLimit,
}

impl AdmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::GlobalLimit => StatusCode::SERVICE_UNAVAILABLE,
            AdmissionError::PerIpLimit => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::GlobalLimit => "server_busy",
            AdmissionError::PerIpLimit => "too_many_connections",
        }
    }
}

#[derive(Serialize)]
struct AdmissionErrorBody {
    status: u16,
    code: &'static str,
    message: String,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = AdmissionErrorBody {
            status: status.as_u16(),
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub connections: usize,
    pub unique_clients: usize,
    pub max_per_ip: usize,
    pub global_limit: usize,
}

#[derive(Debug, Default)]
struct StreamCounts {
    total: usize,
    per_ip: HashMap<IpAddr, usize>,
}

/// Manages all live event-stream connections.
pub struct StreamManager {
    limits: StreamLimits,
    counts: Arc<Mutex<StreamCounts>>,
}

impl StreamManager {
    pub fn new(limits: StreamLimits) -> Self {
        Self {
            limits,
            counts: Arc::new(Mutex::new(StreamCounts::default())),
        }
    }

    /// Admission control: global ceiling first, then the per-IP ceiling.
    /// On rejection nothing is touched; on success the returned slot holds
    /// both counter increments until released or dropped.
    pub fn try_open(&self, ip: IpAddr) -> Result<StreamSlot, AdmissionError> {
        let mut counts = self.counts.lock().unwrap();

        if counts.total >= self.limits.global_limit {
            warn!("Stream rejected: global limit {} reached", self.limits.global_limit);
            metrics::record_stream_rejected("global");
            return Err(AdmissionError::GlobalLimit);
        }

        let ip_count = counts.per_ip.get(&ip).copied().unwrap_or(0);
        if ip_count >= self.limits.max_per_ip {
            warn!(
                "Stream rejected: {} already has {} connections",
                ip, ip_count
            );
            metrics::record_stream_rejected("per_ip");
            return Err(AdmissionError::PerIpLimit);
        }

        counts.total += 1;
        *counts.per_ip.entry(ip).or_insert(0) += 1;
        metrics::set_active_streams(counts.total);

        Ok(StreamSlot {
            counts: self.counts.clone(),
            ip,
            released: AtomicBool::new(false),
        })
    }

    pub fn stats(&self) -> StreamStats {
        let counts = self.counts.lock().unwrap();
        StreamStats {
            connections: counts.total,
            unique_clients: counts.per_ip.len(),
            max_per_ip: self.limits.max_per_ip,
            global_limit: self.limits.global_limit,
        }
    }
}

/// One admitted connection. Dropping it (or calling `release` any number of
/// times) decrements the counters exactly once.
#[derive(Debug)]
pub struct StreamSlot {
    counts: Arc<Mutex<StreamCounts>>,
    ip: IpAddr,
    released: AtomicBool,
}

impl StreamSlot {
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let mut counts = self.counts.lock().unwrap();
            counts.total = counts.total.saturating_sub(1);
            if let Some(count) = counts.per_ip.get_mut(&self.ip) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.per_ip.remove(&self.ip);
                }
            }
            metrics::set_active_streams(counts.total);
        }
    }
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.release();
    }
}
