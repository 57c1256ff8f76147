// src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `harflow.toml` (or the file named by `HARFLOW_CONFIG`), then environment
//! variables such as `HARFLOW_CAPTURE__BLOB_THRESHOLD_BYTES=4096`.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default size at which string fields are moved to the blob store (10 KiB)
pub const DEFAULT_BLOB_THRESHOLD: usize = 10 * 1024;

/// Upper bound for the sum of all shutdown timeouts
pub const MAX_SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureConfig,
    pub timeouts: TimeoutConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Capture and storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Root directory for session directories
    pub recordings_dir: PathBuf,

    /// Optional project name, nests sessions under `<project>/recordings`
    pub project: Option<String>,

    /// Fields of this many bytes or more are offloaded to blobs
    pub blob_threshold_bytes: usize,

    /// Characters kept inline as a preview of an offloaded field
    pub preview_chars: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from("recordings"),
            project: None,
            blob_threshold_bytes: DEFAULT_BLOB_THRESHOLD,
            preview_chars: 256,
        }
    }
}

impl CaptureConfig {
    /// Directory under which `<user>/<session_id>` directories are created
    pub fn sessions_root(&self) -> PathBuf {
        match &self.project {
            Some(project) => self.recordings_dir.join(project).join("recordings"),
            None => self.recordings_dir.clone(),
        }
    }
}

/// Timeouts, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub health_probe_ms: u64,
    pub final_capture_ms: u64,
    pub target_close_ms: u64,
    pub har_settle_ms: u64,
    pub dispatcher_drain_ms: u64,
    pub navigation_ms: u64,
    pub narration_stop_ms: u64,
    pub transcription_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            health_probe_ms: 5_000,
            final_capture_ms: 3_000,
            target_close_ms: 3_000,
            har_settle_ms: 1_000,
            dispatcher_drain_ms: 1_000,
            navigation_ms: 30_000,
            narration_stop_ms: 1_000,
            transcription_ms: 30_000,
        }
    }
}

impl TimeoutConfig {
    pub fn health_probe(&self) -> Duration {
        Duration::from_millis(self.health_probe_ms)
    }

    pub fn final_capture(&self) -> Duration {
        Duration::from_millis(self.final_capture_ms)
    }

    pub fn target_close(&self) -> Duration {
        Duration::from_millis(self.target_close_ms)
    }

    pub fn har_settle(&self) -> Duration {
        Duration::from_millis(self.har_settle_ms)
    }

    pub fn dispatcher_drain(&self) -> Duration {
        Duration::from_millis(self.dispatcher_drain_ms)
    }

    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn narration_stop(&self) -> Duration {
        Duration::from_millis(self.narration_stop_ms)
    }

    pub fn transcription(&self) -> Duration {
        Duration::from_millis(self.transcription_ms)
    }

    /// Worst-case time spent on the automation target during `stop_recording`
    pub fn shutdown_budget(&self) -> Duration {
        self.final_capture() + self.target_close() + self.har_settle() + self.dispatcher_drain()
    }
}

/// Recording loop intervals, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub stop_poll_ms: u64,
    pub dom_drain_ms: u64,
    pub health_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            stop_poll_ms: 50,
            dom_drain_ms: 1_000,
            health_interval_ms: 5_000,
        }
    }
}

impl PollingConfig {
    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }

    pub fn dom_drain(&self) -> Duration {
        Duration::from_millis(self.dom_drain_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter for the console layer
    pub console_level: String,

    /// Optional log file receiving `file_level` output
    pub file: Option<PathBuf>,

    pub file_level: String,

    /// Emit JSON lines in the log file
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: "error".to_string(),
            file: Some(PathBuf::from("logs/harflow_capture.log")),
            file_level: "debug".to_string(),
            json: false,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint; disabled when unset
    pub prometheus_listen: Option<SocketAddr>,
}

impl EngineConfig {
    /// Load configuration from defaults, file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("HARFLOW_CONFIG").unwrap_or_else(|_| "harflow".to_string());
        Self::load_from(&path)
    }

    /// Load configuration using `path` as the optional file source
    pub fn load_from(path: &str) -> Result<Self> {
        let defaults = config::Config::try_from(&EngineConfig::default())
            .map_err(|e| EngineError::ConfigError(format!("Invalid defaults: {}", e)))?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("HARFLOW")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| EngineError::ConfigError(format!("Failed to load config: {}", e)))?;

        let config: EngineConfig = settings
            .try_deserialize()
            .map_err(|e| EngineError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.capture.blob_threshold_bytes == 0 {
            return Err(EngineError::ConfigError(
                "blob_threshold_bytes must be greater than 0".to_string(),
            ));
        }

        let intervals = [
            ("stop_poll_ms", self.polling.stop_poll_ms),
            ("dom_drain_ms", self.polling.dom_drain_ms),
            ("health_interval_ms", self.polling.health_interval_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(EngineError::ConfigError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        let budget = self.timeouts.shutdown_budget();
        if budget > MAX_SHUTDOWN_BUDGET {
            return Err(EngineError::ConfigError(format!(
                "Shutdown timeouts add up to {:?}, limit is {:?}",
                budget, MAX_SHUTDOWN_BUDGET
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.blob_threshold_bytes, 10240);
        assert!(config.timeouts.shutdown_budget() <= MAX_SHUTDOWN_BUDGET);
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config = EngineConfig::default();
        config.capture.blob_threshold_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_polling_intervals_rejected() {
        let mut config = EngineConfig::default();
        config.polling.dom_drain_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dom_drain_ms"));

        let mut config = EngineConfig::default();
        config.polling.health_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("health_interval_ms"));
    }

    #[test]
    fn test_shutdown_budget_limit() {
        let mut config = EngineConfig::default();
        config.timeouts.target_close_ms = 9_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sessions_root_with_project() {
        let mut capture = CaptureConfig::default();
        assert_eq!(capture.sessions_root(), PathBuf::from("recordings"));

        capture.project = Some("acme".to_string());
        assert_eq!(
            capture.sessions_root(),
            PathBuf::from("recordings/acme/recordings")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "[capture]\nblob_threshold_bytes = 4096\n\n[polling]\ndom_drain_ms = 250\n",
        )
        .unwrap();

        let config = EngineConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.capture.blob_threshold_bytes, 4096);
        assert_eq!(config.polling.dom_drain_ms, 250);
        assert_eq!(config.timeouts.health_probe_ms, 5_000);
    }
}
