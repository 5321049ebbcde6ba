//! Configuration for the engine daemon
//!
//! Layered lowest to highest: built-in defaults, an optional file, then
//! `ENGINE_`-prefixed environment variables with `__` between nested keys
//! (`ENGINE_SERVER__PORT=9000`). Command-line flags are applied on top by the
//! binary.

use engine_core::{ConsumerConfig, WorkerConfig};
use engine_dispatch::{GatewayConfig, RetryPolicy, DEFAULT_AGENT_KIND};
use engine_release::ReconcilerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DaemonError, DaemonResult};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub consumer: ConsumerSettings,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP read API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: true,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> DaemonResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| DaemonError::Config(format!("Invalid listen address {}:{}: {}", self.host, self.port, e)))
    }
}

/// Partitioned log consumption
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Directory holding the file-backed log
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default = "default_progress_path")]
    pub progress_path: PathBuf,

    #[serde(default = "default_topic")]
    pub topic: String,

    /// Partition count; this process consumes all of them
    #[serde(default = "default_partitions")]
    pub partitions: u32,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_flush_every")]
    pub flush_every_messages: usize,

    #[serde(default = "default_fetch_batch")]
    pub fetch_batch_size: usize,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            progress_path: default_progress_path(),
            topic: default_topic(),
            partitions: default_partitions(),
            flush_interval_ms: default_flush_interval(),
            flush_every_messages: default_flush_every(),
            fetch_batch_size: default_fetch_batch(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl ConsumerSettings {
    pub fn to_consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            topic: self.topic.clone(),
            partitions: (0..self.partitions).collect(),
            worker: WorkerConfig {
                flush_interval: Duration::from_millis(self.flush_interval_ms),
                flush_every_messages: self.flush_every_messages.max(1),
                fetch_batch_size: self.fetch_batch_size.max(1),
                poll_interval: Duration::from_millis(self.poll_interval_ms),
            },
        }
    }
}

/// Per-workspace reconciliation loops
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    /// Job results held while their job does not exist yet
    #[serde(default = "default_early_result_limit")]
    pub early_result_limit: usize,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            notification_capacity: default_notification_capacity(),
            early_result_limit: default_early_result_limit(),
        }
    }
}

impl ReconcilerSettings {
    pub fn to_reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            tick_interval: Duration::from_secs(self.tick_interval_secs.max(1)),
        }
    }
}

/// Job dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_dispatches: usize,

    /// Dispatcher type used when no configured job agent qualifies
    #[serde(default = "default_agent_kind")]
    pub default_agent_kind: String,

    /// Register the in-memory recording agent under `default_agent_kind`
    #[serde(default = "default_true")]
    pub recording_agent: bool,

    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_ms: u64,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: default_max_concurrent(),
            default_agent_kind: default_agent_kind(),
            recording_agent: true,
            webhook_timeout_ms: default_webhook_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl DispatchSettings {
    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_concurrent_dispatches: self.max_concurrent_dispatches.max(1),
            default_agent_kind: self.default_agent_kind.clone(),
        }
    }

    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_millis(
            self.initial_backoff_ms,
            self.max_backoff_ms,
            self.multiplier,
            self.max_attempts,
        )
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }
}

/// Span export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// OTLP gRPC endpoint; export is off when unset
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("data/log")
}

fn default_progress_path() -> PathBuf {
    PathBuf::from("data/progress.json")
}

fn default_topic() -> String {
    "workspace-events".to_string()
}

fn default_partitions() -> u32 {
    4
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_flush_every() -> usize {
    100
}

fn default_fetch_batch() -> usize {
    256
}

fn default_poll_interval() -> u64 {
    200
}

fn default_tick_interval() -> u64 {
    30
}

fn default_notification_capacity() -> usize {
    1024
}

fn default_early_result_limit() -> usize {
    engine_release::DEFAULT_EARLY_RESULT_LIMIT
}

fn default_max_concurrent() -> usize {
    16
}

fn default_agent_kind() -> String {
    DEFAULT_AGENT_KIND.to_string()
}

fn default_webhook_timeout() -> u64 {
    10_000
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    8
}

fn default_service_name() -> String {
    "workspace-engine".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ENGINE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.server.port, 8082);
        assert_eq!(config.server.listen_addr().unwrap().to_string(), "0.0.0.0:8082");
        assert_eq!(config.consumer.topic, "workspace-events");
        assert_eq!(config.telemetry.service_name, "workspace-engine");
        assert!(config.telemetry.otlp_endpoint.is_none());
    }

    #[test]
    fn test_consumer_settings_convert() {
        let consumer = ConsumerSettings {
            partitions: 3,
            flush_interval_ms: 250,
            ..ConsumerSettings::default()
        }
        .to_consumer_config();
        assert_eq!(consumer.partitions, vec![0, 1, 2]);
        assert_eq!(consumer.worker.flush_interval, Duration::from_millis(250));
        assert_eq!(consumer.worker.flush_every_messages, 100);
    }

    #[test]
    fn test_dispatch_defaults() {
        let dispatch = DispatchSettings::default();
        assert_eq!(dispatch.to_gateway_config().max_concurrent_dispatches, 16);
        assert_eq!(dispatch.to_retry_policy(), RetryPolicy::default());
        assert_eq!(dispatch.default_agent_kind, "github-action");
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[server]\nport = 9100\n\n[consumer]\npartitions = 8\n\n[logging]\njson = true"
        )
        .unwrap();

        let config = DaemonConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.consumer.partitions, 8);
        assert_eq!(config.consumer.fetch_batch_size, 256);
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = DaemonConfig::load(Some("/nonexistent/engine")).unwrap();
        assert_eq!(config.reconciler.tick_interval_secs, 30);
        assert_eq!(config.dispatch.max_attempts, 8);
    }
}
