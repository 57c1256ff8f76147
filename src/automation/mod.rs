// src/automation/mod.rs
//! External collaborators
//!
//! - **Target**: the browser automation engine's page and recording context
//! - **Raw**: plain-value callback events the engine delivers
//! - **Narration**: the audio narration start/stop/transcribe contract
//! - **Scripted**: an in-memory target for offline runs and tests

pub mod narration;
pub mod raw;
pub mod scripted;
pub mod target;

pub use narration::{NarrationStarted, NarrationStopped, Narrator, Transcript};
pub use raw::{
    ConnectionKey, FrameDirection, FramePayload, RawBody, RawConsoleMessage, RawEvent,
    RawPageError, RawRequest, RawResponse, SourceLocation,
};
pub use scripted::ScriptedTarget;
pub use target::{normalize_url, AutomationTarget, BLANK_PAGE};

use crate::utils::errors::{EngineError, Result};
use std::future::Future;
use std::time::Duration;

/// Run a call against the target, failing with `Timeout` after `limit`
pub async fn with_timeout<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(format!("{} after {:?}", what, limit))),
    }
}
