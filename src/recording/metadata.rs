// src/recording/metadata.rs
//! Session metadata summary (`metadata.json`)

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";
pub const EVENT_LOG_FILE: &str = "events.ndjson";
pub const BLOB_DIR: &str = "blobs";
pub const AUDIO_FILE: &str = "audio.wav";
pub const AUDIO_EVENTS_FILE: &str = "audio_events.ndjson";

/// Flat summary read by listing and reporting tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub start_time: String,
    pub end_time: String,
    pub duration_seconds: f64,
    pub total_events: u64,
    pub total_blobs: usize,
    pub cookie_timeline_length: usize,
    pub har_file: String,
    pub har_reconstructed: bool,
    pub event_log: String,
    pub blob_directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_events: Option<String>,
}

impl SessionMetadata {
    /// Record the narration artifacts that exist in `session_dir`
    pub fn with_audio_artifacts(mut self, session_dir: &Path) -> Self {
        if session_dir.join(AUDIO_FILE).exists() {
            self.audio_file = Some(AUDIO_FILE.to_string());
        }
        if session_dir.join(AUDIO_EVENTS_FILE).exists() {
            self.audio_events = Some(AUDIO_EVENTS_FILE.to_string());
        }
        self
    }

    /// Write `metadata.json` into `session_dir`
    pub fn write(&self, session_dir: &Path) -> Result<PathBuf> {
        let path = session_dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)
            .map_err(|e| EngineError::storage("Failed to write metadata", e))?;
        Ok(path)
    }

    /// Read `metadata.json` from `session_dir`
    pub fn read(session_dir: &Path) -> Result<Self> {
        let path = session_dir.join(METADATA_FILE);
        let json = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::storage("Failed to read metadata", e))?;
        Ok(serde_json::from_str(&json)?)
    }
}
