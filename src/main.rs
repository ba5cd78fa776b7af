use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agent_notify_server::config::{AppConfig, CliConfig, FileConfig};
use agent_notify_server::notifications::{NotificationFile, NotificationStore};
use agent_notify_server::server::stream::StreamLimits;
use agent_notify_server::server::{metrics, run_server, RequestsLoggingLevel};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory where the notifications file lives.
    #[clap(long, value_parser = parse_path)]
    pub data_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in it override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3456)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Maximum number of notification records held in the store.
    #[clap(long, default_value_t = 1000)]
    pub max_count: usize,

    /// Seconds before a notification expires.
    #[clap(long, default_value_t = 86_400)]
    pub ttl_secs: u64,

    /// Interval in seconds between cleanup passes.
    #[clap(long, default_value_t = 300)]
    pub cleanup_interval_secs: u64,

    /// Maximum concurrent event-stream connections per client IP.
    #[clap(long, default_value_t = 5)]
    pub max_connections_per_ip: usize,

    /// Maximum concurrent event-stream connections overall.
    #[clap(long, default_value_t = 100)]
    pub global_connection_limit: usize,

    /// Seconds between keepalive frames on open event streams.
    #[clap(long, default_value_t = 30)]
    pub keepalive_secs: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            data_dir: self.data_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            max_count: self.max_count,
            ttl_secs: self.ttl_secs,
            cleanup_interval_secs: self.cleanup_interval_secs,
            max_connections_per_ip: self.max_connections_per_ip,
            global_connection_limit: self.global_connection_limit,
            keepalive_secs: self.keepalive_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!(
        "Loading notifications from {:?}...",
        config.notifications_file_path()
    );
    let file = NotificationFile::new(config.notifications_file_path());
    let store = Arc::new(NotificationStore::new(
        file,
        config.max_count,
        Duration::from_secs(config.ttl_secs),
    ));
    store.load().await;
    metrics::set_live_notifications(store.stats().total);

    // Periodic cleanup of expired records.
    if config.cleanup_interval_secs > 0 {
        let cleanup_store = store.clone();
        let interval = Duration::from_secs(config.cleanup_interval_secs);
        info!("Cleanup enabled every {:?}", interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            // Skip the first immediate tick, wait for the first interval
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let report = cleanup_store.cleanup();
                if report.removed() > 0 {
                    info!(
                        "Cleanup removed {} records ({} expired, {} evicted)",
                        report.removed(),
                        report.expired,
                        report.evicted
                    );
                }
                metrics::set_live_notifications(cleanup_store.stats().total);
            }
        });
    }

    info!("Ready to serve at port {}!", config.port);
    info!("Metrics available at port {}!", config.metrics_port);
    run_server(
        store.clone(),
        config.logging_level,
        config.port,
        config.metrics_port,
        StreamLimits {
            max_per_ip: config.max_connections_per_ip,
            global_limit: config.global_connection_limit,
        },
        Duration::from_secs(config.keepalive_secs),
    )
    .await?;

    info!("Flushing notifications before exit...");
    store.save_immediate().await;

    Ok(())
}
