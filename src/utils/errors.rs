// src/utils/errors.rs
//! Error types for the capture engine
//!
//! Errors fall into four classes that decide how a failure is reported:
//!
//! - **Producer**: one raw callback could not be normalized; the event is dropped
//! - **Storage**: a log or blob write failed; capture continues
//! - **Lifecycle**: an invalid session state transition; returned to the caller
//! - **External target**: the automation engine's resource is gone or unresponsive

use crate::session::state::SessionPhase;
use thiserror::Error;

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to normalize event: {0}")]
    Producer(String),

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Capture target closed: {0}")]
    TargetClosed(String),

    #[error("Capture target error: {0}")]
    ExternalTarget(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invalid session state transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("A recording is already active")]
    AlreadyRecording,

    #[error("No active recording")]
    NoActiveRecording,

    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionPhase,
        to: SessionPhase,
    },
}

/// Error class used by the closing policy to pick a log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Producer,
    Storage,
    Lifecycle,
    ExternalTarget,
}

impl EngineError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Producer(_) | EngineError::Serialization(_) => ErrorClass::Producer,
            EngineError::StorageFailed(_) | EngineError::ConfigError(_) => ErrorClass::Storage,
            EngineError::Lifecycle(_) => ErrorClass::Lifecycle,
            EngineError::TargetClosed(_)
            | EngineError::ExternalTarget(_)
            | EngineError::Timeout(_) => ErrorClass::ExternalTarget,
        }
    }

    /// Whether the failure means the remote target has gone away
    pub fn is_target_gone(&self) -> bool {
        match self {
            EngineError::TargetClosed(_) => true,
            EngineError::ExternalTarget(msg) => {
                msg.contains("Target closed") || msg.contains("Connection closed")
            }
            _ => false,
        }
    }

    /// Storage error from an I/O failure with context
    pub fn storage(context: &str, err: std::io::Error) -> Self {
        EngineError::StorageFailed(format!("{}: {}", context, err))
    }
}
