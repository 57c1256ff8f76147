// src/session/state.rs
//! Session lifecycle state machine
//!
//! ```text
//! Idle ──start──▶ Opening ──attached──▶ Recording ──stop/unhealthy──▶ Closing
//!  ▲                 │                                                   │
//!  └──start failed───┘◀───────────────────finalized──────────────────────┘
//! ```

use crate::utils::errors::LifecycleError;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle phase of the controller's session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Opening,
    Recording,
    Closing,
}

impl SessionPhase {
    fn as_u8(self) -> u8 {
        match self {
            SessionPhase::Idle => 0,
            SessionPhase::Opening => 1,
            SessionPhase::Recording => 2,
            SessionPhase::Closing => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionPhase::Opening,
            2 => SessionPhase::Recording,
            3 => SessionPhase::Closing,
            _ => SessionPhase::Idle,
        }
    }

    /// Whether `self -> to` is a legal edge
    pub fn can_transition_to(self, to: SessionPhase) -> bool {
        matches!(
            (self, to),
            (SessionPhase::Idle, SessionPhase::Opening)
                | (SessionPhase::Opening, SessionPhase::Recording)
                | (SessionPhase::Opening, SessionPhase::Idle)
                | (SessionPhase::Recording, SessionPhase::Closing)
                | (SessionPhase::Closing, SessionPhase::Idle)
        )
    }
}

/// Shared, atomically updated session phase
#[derive(Debug, Clone)]
pub struct PhaseCell {
    phase: Arc<AtomicU8>,
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseCell {
    pub fn new() -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(SessionPhase::Idle.as_u8())),
        }
    }

    /// Current phase
    pub fn get(&self) -> SessionPhase {
        SessionPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to`, failing if the phase is not `from`
    pub fn transition(&self, from: SessionPhase, to: SessionPhase) -> Result<(), LifecycleError> {
        if !from.can_transition_to(to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }

        self.phase
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| {
                let actual = SessionPhase::from_u8(actual);
                match (actual, to) {
                    (_, SessionPhase::Opening) => LifecycleError::AlreadyRecording,
                    (_, SessionPhase::Closing) => LifecycleError::NoActiveRecording,
                    _ => LifecycleError::InvalidTransition { from: actual, to },
                }
            })
    }
}
