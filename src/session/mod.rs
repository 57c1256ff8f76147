// src/session/mod.rs
//! Session lifecycle
//!
//! - **State**: the Idle/Opening/Recording/Closing machine
//! - **Policy**: how producers behave while the session closes
//! - **Health**: target liveness probing
//! - **Controller**: start, stop, snapshots, navigation and the recording loop

pub mod controller;
pub mod health;
pub mod policy;
pub mod state;

pub use controller::{
    generate_session_id, RecordingRequest, SessionController, SessionStarted, SessionStatus,
    StopReport,
};
pub use health::HealthMonitor;
pub use policy::ClosingPolicy;
pub use state::{PhaseCell, SessionPhase};
