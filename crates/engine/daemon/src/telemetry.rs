//! Tracing initialization and span export
//!
//! Console output is human-readable or JSON. When an OTLP endpoint is
//! configured, spans are also exported over gRPC through a
//! `tracing-opentelemetry` layer.

use opentelemetry::KeyValue;
use opentelemetry_sdk::{
    runtime,
    trace::{Config, Tracer},
    Resource,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LoggingConfig, TelemetryConfig};
use crate::error::{DaemonError, DaemonResult};

/// Install the global subscriber; returns the exporting tracer, if any
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(logging: &LoggingConfig, telemetry: &TelemetryConfig) -> DaemonResult<Option<Tracer>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let tracer = match telemetry.otlp_endpoint.as_deref() {
        Some(endpoint) if !endpoint.is_empty() => Some(init_otlp_tracer(telemetry, endpoint)?),
        _ => None,
    };
    let otel_layer = tracer
        .clone()
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(otel_layer);
    let installed = if logging.json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    } else {
        subscriber.with(fmt::layer().with_target(true)).try_init()
    };
    installed.map_err(|e| DaemonError::Telemetry(e.to_string()))?;

    Ok(tracer)
}

fn init_otlp_tracer(telemetry: &TelemetryConfig, endpoint: &str) -> DaemonResult<Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    let trace_config = Config::default().with_resource(Resource::new(vec![KeyValue::new(
        "service.name",
        telemetry.service_name.clone(),
    )]));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(trace_config)
        .install_batch(runtime::Tokio)
        .map_err(|e| DaemonError::Telemetry(e.to_string()))
}

/// Flush pending spans
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
