// src/utils/mod.rs
//! Common utilities: errors, configuration and the injectable clock

pub mod clock;
pub mod config;
pub mod errors;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use errors::{EngineError, LifecycleError, Result};
