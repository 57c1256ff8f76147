// src/session/policy.rs
//! Closing policy
//!
//! Every producer asks the policy whether it may still emit events and hands
//! it the errors it hits. Once the session starts closing, late producer
//! events are dropped and failures caused by the vanishing target are
//! reported at debug level instead of as warnings.

use crate::session::state::{PhaseCell, SessionPhase};
use crate::utils::errors::{EngineError, ErrorClass};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Decides how producers behave around shutdown
///
/// Clones share the phase and the suppression counter.
#[derive(Debug, Clone, Default)]
pub struct ClosingPolicy {
    phase: PhaseCell,
    suppressed: Arc<AtomicU64>,
}

impl ClosingPolicy {
    pub fn new(phase: PhaseCell) -> Self {
        Self {
            phase,
            suppressed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    pub fn is_recording(&self) -> bool {
        self.phase() == SessionPhase::Recording
    }

    pub fn is_closing(&self) -> bool {
        self.phase() == SessionPhase::Closing
    }

    /// Whether producer callbacks may still write events
    pub fn accepts_producer_events(&self) -> bool {
        matches!(self.phase(), SessionPhase::Opening | SessionPhase::Recording)
    }

    /// Record that a producer event was dropped
    pub fn dropped(&self, what: &str) {
        debug!("Dropping {} ({:?})", what, self.phase());
        self.suppressed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("capture_events_dropped_total").increment(1);
    }

    /// Events dropped and failures downgraded to debug because of shutdown
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    fn suppress(&self, context: &str, err: &EngineError) {
        debug!("{} (target shutting down): {}", context, err);
        self.suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Report a failure at the level the current phase calls for
    pub fn report(&self, context: &str, err: &EngineError) {
        let shutting_down = !self.accepts_producer_events();

        match err.class() {
            ErrorClass::ExternalTarget => {
                if shutting_down {
                    self.suppress(context, err);
                } else if err.is_target_gone() {
                    // The health monitor reports the lost page once
                    debug!("{} (target gone): {}", context, err);
                } else {
                    warn!("{}: {}", context, err);
                }
            }
            ErrorClass::Producer => {
                if shutting_down {
                    self.suppress(context, err);
                } else {
                    warn!("{}: {}", context, err);
                }
                metrics::counter!("capture_events_dropped_total").increment(1);
            }
            ErrorClass::Storage => {
                error!("{}: {}", context, err);
            }
            ErrorClass::Lifecycle => {
                warn!("{}: {}", context, err);
            }
        }
    }
}
