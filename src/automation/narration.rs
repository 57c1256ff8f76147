// src/automation/narration.rs
//! Audio narration collaborator
//!
//! Capture and transcription run in the narrator's own threads; the engine
//! only calls this contract and stores the results in the session directory.

use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationStarted {
    pub start_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationStopped {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub chunk_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<serde_json::Value>,
}

/// Narration capture and transcription
///
/// Calls may block; the controller runs them on the blocking pool with a
/// timeout.
pub trait Narrator: Send + Sync {
    /// Start recording into `dir`; `continuous` enables chunked transcription
    /// into `audio_events.ndjson`
    fn start(&self, session_id: &str, continuous: bool, dir: &Path) -> Result<NarrationStarted>;

    /// Stop recording and save the audio file
    fn stop(&self) -> Result<NarrationStopped>;

    /// Transcribe a saved recording
    fn transcribe(&self, path: &Path) -> Result<Transcript>;
}
