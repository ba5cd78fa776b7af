//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.

// ============================================================================
// Timeouts
// ============================================================================

/// Per-request timeout for the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long to wait for a spawned server to answer its first request
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Poll interval while waiting for server readiness
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

// ============================================================================
// Store settings used by TestServer::spawn()
// ============================================================================

/// Capacity of the test store
pub const TEST_MAX_COUNT: usize = 100;

/// TTL of test notifications, long enough to never expire mid-test
pub const TEST_TTL_SECS: u64 = 3600;

/// Short debounce so persistence is observable without long sleeps
pub const TEST_SAVE_DEBOUNCE_MS: u64 = 50;
