mod file_config;

pub use file_config::{FileConfig, LimitsConfig};

use crate::server::stream::{DEFAULT_GLOBAL_LIMIT, DEFAULT_MAX_PER_IP};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub max_count: usize,
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub max_connections_per_ip: usize,
    pub global_connection_limit: usize,
    pub keepalive_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub data_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    // Store settings
    pub max_count: usize,
    pub ttl_secs: u64,
    pub cleanup_interval_secs: u64,

    // Streaming settings
    pub max_connections_per_ip: usize,
    pub global_connection_limit: usize,
    pub keepalive_secs: u64,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("data_dir must be specified via --data-dir or in config file")
            })?;

        // Validate data_dir exists
        if !data_dir.exists() {
            bail!("Data directory does not exist: {:?}", data_dir);
        }
        if !data_dir.is_dir() {
            bail!("data_dir is not a directory: {:?}", data_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let limits = file.limits.unwrap_or_default();
        let max_count = limits.max_count.unwrap_or(cli.max_count);
        let ttl_secs = limits.ttl_secs.unwrap_or(cli.ttl_secs);
        let cleanup_interval_secs = limits
            .cleanup_interval_secs
            .unwrap_or(cli.cleanup_interval_secs);
        let max_connections_per_ip = limits
            .max_connections_per_ip
            .unwrap_or(cli.max_connections_per_ip);
        let global_connection_limit = limits
            .global_connection_limit
            .unwrap_or(cli.global_connection_limit);
        let keepalive_secs = limits.keepalive_secs.unwrap_or(cli.keepalive_secs);

        if max_count == 0 {
            bail!("max_count must be at least 1");
        }
        if ttl_secs == 0 {
            bail!("ttl_secs must be at least 1");
        }
        if max_connections_per_ip == 0 {
            bail!("max_connections_per_ip must be at least 1");
        }
        if global_connection_limit < max_connections_per_ip {
            bail!(
                "global_connection_limit ({}) must be at least max_connections_per_ip ({})",
                global_connection_limit,
                max_connections_per_ip
            );
        }
        if keepalive_secs == 0 {
            bail!("keepalive_secs must be at least 1");
        }

        Ok(Self {
            data_dir,
            port,
            metrics_port,
            logging_level,
            max_count,
            ttl_secs,
            cleanup_interval_secs,
            max_connections_per_ip,
            global_connection_limit,
            keepalive_secs,
        })
    }

    pub fn notifications_file_path(&self) -> PathBuf {
        self.data_dir.join("notifications.json")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            port: 3456,
            metrics_port: 9090,
            logging_level: RequestsLoggingLevel::Path,
            max_count: 1000,
            ttl_secs: 86_400,
            cleanup_interval_secs: 300,
            max_connections_per_ip: DEFAULT_MAX_PER_IP,
            global_connection_limit: DEFAULT_GLOBAL_LIMIT,
            keepalive_secs: 30,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
