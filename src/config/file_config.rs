use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub data_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    // Feature configs
    pub limits: Option<LimitsConfig>,
}

/// Tunables for the store and the streaming layer.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_count: Option<usize>,
    pub ttl_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
    pub max_connections_per_ip: Option<usize>,
    pub global_connection_limit: Option<usize>,
    pub keepalive_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
