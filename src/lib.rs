// src/lib.rs
//! HarFlow Capture Engine Library
//!
//! Records a browser security-testing session as an append-only,
//! content-addressed event log plus a HAR document.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **recording**: Event log, blob store, HAR reconstruction, metadata
//! - **tracking**: Normalizers for network, cookie, console, websocket and DOM events
//! - **session**: Lifecycle state machine, closing policy, health, controller
//! - **automation**: Contracts for the browser automation engine and narration
//! - **observability**: Tracing and metrics
//! - **utils**: Errors, configuration, clock

// Public module exports
pub mod automation;
pub mod observability;
pub mod recording;
pub mod session;
pub mod tracking;
pub mod utils;

// Re-export commonly used types
pub use automation::{AutomationTarget, Narrator, ScriptedTarget};
pub use recording::{Event, EventLog, EventType};
pub use session::{RecordingRequest, SessionController, StopReport};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
