//! Workspace engine daemon
//!
//! Consumes workspace events from the partitioned log, keeps every
//! workspace's state in memory, dispatches jobs and serves the read API.

use clap::Parser;
use engine_daemon::{telemetry, DaemonConfig, DaemonError, DaemonResult, Server};
use std::path::PathBuf;
use tracing::info;

/// Workspace engine CLI
#[derive(Parser)]
#[command(name = "workspace-engine")]
#[command(about = "Workspace Engine - event-sourced release orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ENGINE_CONFIG")]
    config: Option<String>,

    /// Listen host
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Service name reported with exported spans
    #[arg(long, env = "OTEL_SERVICE_NAME")]
    service_name: Option<String>,

    /// OTLP gRPC endpoint; span export is off when unset
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Directory of the partitioned log
    #[arg(long, env = "ENGINE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Topic carrying workspace events
    #[arg(long, env = "ENGINE_TOPIC")]
    topic: Option<String>,

    /// Number of partitions of the topic
    #[arg(long, env = "ENGINE_PARTITIONS")]
    partitions: Option<u32>,

    /// Progress checkpoint file
    #[arg(long, env = "ENGINE_PROGRESS_PATH")]
    progress_path: Option<PathBuf>,

    /// Log level
    #[arg(long, env = "ENGINE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "ENGINE_LOG_JSON")]
    json: bool,
}

impl Cli {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(service_name) = self.service_name {
            config.telemetry.service_name = service_name;
        }
        if self.otlp_endpoint.is_some() {
            config.telemetry.otlp_endpoint = self.otlp_endpoint;
        }
        if let Some(log_dir) = self.log_dir {
            config.consumer.log_dir = log_dir;
        }
        if let Some(topic) = self.topic {
            config.consumer.topic = topic;
        }
        if let Some(partitions) = self.partitions {
            config.consumer.partitions = partitions;
        }
        if let Some(progress_path) = self.progress_path {
            config.consumer.progress_path = progress_path;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.json {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;
    cli.apply(&mut config);

    let tracer = telemetry::init_tracing(&config.logging, &config.telemetry)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %config.telemetry.service_name,
        otlp = tracer.is_some(),
        partitions = config.consumer.partitions,
        log_dir = %config.consumer.log_dir.display(),
        "Starting workspace engine"
    );

    let server = Server::new(config).await?;
    let result = server.run().await;

    if tracer.is_some() {
        telemetry::shutdown_tracing();
    }
    result
}
