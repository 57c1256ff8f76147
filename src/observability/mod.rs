// src/observability/mod.rs
//! Logging and metrics setup
//!
//! The console stays quiet (`error` by default) because the recorder's
//! terminal shows its own status line; the log file receives `debug` output,
//! plain or JSON.

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::sync::Mutex;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

static METRICS_LISTENER: OnceCell<SocketAddr> = OnceCell::new();

fn filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| EngineError::ConfigError(format!("Invalid log level '{}': {}", directive, e)))
}

/// Install the global tracing subscriber
///
/// `RUST_LOG`, when set, overrides the console level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let console_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => filter(&config.console_level)?,
    };
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = match &config.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::storage("Failed to create log directory", e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| EngineError::storage("Failed to open log file", e))?;
            let writer = Mutex::new(file);
            let file_filter = filter(&config.file_level)?;

            let layer = if config.json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(file_filter)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_filter(file_filter)
                    .boxed()
            };
            Some(layer)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| EngineError::ConfigError(format!("Failed to install tracing: {}", e)))?;

    debug!("Tracing initialized");
    Ok(())
}

/// Install the Prometheus exporter when a listen address is configured
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    let Some(addr) = config.prometheus_listen else {
        debug!("Metrics exporter disabled");
        return Ok(());
    };

    if let Some(existing) = METRICS_LISTENER.get() {
        debug!("Metrics exporter already listening on {}", existing);
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::ConfigError(format!("Failed to install metrics exporter: {}", e)))?;
    let _ = METRICS_LISTENER.set(addr);

    describe_metrics();
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("capture_events_written_total", "Events appended to session logs");
    metrics::describe_counter!("capture_blobs_stored_total", "Distinct blobs written");
    metrics::describe_counter!("capture_blob_dedup_hits_total", "Blob stores satisfied by an existing blob");
    metrics::describe_counter!("capture_events_dropped_total", "Producer events dropped or rejected");
    metrics::describe_counter!("capture_storage_failures_total", "Failed event or blob writes");
    metrics::describe_counter!("capture_har_reconstructions_total", "HAR documents rebuilt from event logs");
}
