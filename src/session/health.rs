// src/session/health.rs
//! Target health probing
//!
//! A trivial script is evaluated under a short timeout. Once a probe fails
//! while recording, the monitor stays unhealthy for the rest of the session.
//! Failures after closing has begun are expected and never count.

use crate::automation::{with_timeout, AutomationTarget};
use crate::session::policy::ClosingPolicy;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cheapest script that proves the page still answers
pub const PROBE_SCRIPT: &str = "() => document.readyState";

pub struct HealthMonitor {
    target: Arc<dyn AutomationTarget>,
    policy: ClosingPolicy,
    timeout: Duration,
    unhealthy: AtomicBool,
}

impl HealthMonitor {
    pub fn new(target: Arc<dyn AutomationTarget>, policy: ClosingPolicy, timeout: Duration) -> Self {
        Self {
            target,
            policy,
            timeout,
            unhealthy: AtomicBool::new(false),
        }
    }

    /// Whether the target is still usable
    pub async fn probe(&self) -> bool {
        if !self.policy.is_recording() {
            return true;
        }
        if self.unhealthy.load(Ordering::SeqCst) {
            return false;
        }

        if self.target.is_closed() {
            warn!("Browser page closed during recording");
            self.unhealthy.store(true, Ordering::SeqCst);
            return false;
        }

        let result = with_timeout(
            self.timeout,
            "health probe",
            self.target.evaluate(PROBE_SCRIPT, serde_json::Value::Null),
        )
        .await;

        match result {
            Ok(_) => true,
            Err(e) if self.policy.is_closing() => {
                debug!("Health probe failed while closing: {}", e);
                true
            }
            Err(e) => {
                warn!("Browser health check failed: {}", e);
                self.unhealthy.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    pub fn is_unhealthy(&self) -> bool {
        self.unhealthy.load(Ordering::SeqCst)
    }
}
