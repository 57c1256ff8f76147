// src/tracking/snapshot.rs
//! Page state snapshots
//!
//! Taken at recording start, after main-frame navigations, on demand and
//! right before the session stops. Buffered interaction events are drained
//! first so the log reads in causal order.

use crate::automation::{with_timeout, AutomationTarget, BLANK_PAGE};
use crate::recording::event::EventType;
use crate::recording::event_log::{EventLog, WriteOrigin};
use crate::session::policy::ClosingPolicy;
use crate::tracking::dom_bridge::DomBridge;
use crate::utils::errors::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Collects storage, cookies and document state
pub const SNAPSHOT_SCRIPT: &str = r#"() => {
  const dump = (s) => { const o = {}; for (let i = 0; i < s.length; i++) { const k = s.key(i); o[k] = s.getItem(k); } return o; };
  const state = { url: location.href, title: document.title, readyState: document.readyState };
  try {
    state.localStorage = dump(localStorage);
    state.sessionStorage = dump(sessionStorage);
    state.cookies = document.cookie;
  } catch (e) {
    state.error = String(e);
  }
  return state;
}"#;

pub struct Snapshotter {
    target: Arc<dyn AutomationTarget>,
    log: Arc<EventLog>,
    dom: Arc<DomBridge>,
    policy: ClosingPolicy,
    timeout: Duration,
}

impl Snapshotter {
    pub fn new(
        target: Arc<dyn AutomationTarget>,
        log: Arc<EventLog>,
        dom: Arc<DomBridge>,
        policy: ClosingPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            target,
            log,
            dom,
            policy,
            timeout,
        }
    }

    /// Capture a snapshot tagged with `trigger`; `None` when skipped
    pub async fn capture(&self, trigger: &str, origin: WriteOrigin) -> Result<Option<String>> {
        if self.target.is_closed() {
            debug!("Page closed, skipping {} snapshot", trigger);
            return Ok(None);
        }

        match self.target.current_url() {
            Some(url) if url != BLANK_PAGE => {}
            _ => {
                debug!("Blank page, skipping {} snapshot", trigger);
                return Ok(None);
            }
        }

        if let Err(e) = self.dom.drain(origin).await {
            self.policy.report("DOM drain before snapshot failed", &e);
        }

        let state = with_timeout(
            self.timeout,
            "capture snapshot",
            self.target.evaluate(SNAPSHOT_SCRIPT, serde_json::Value::Null),
        )
        .await?;

        let id = self.log.append(
            origin,
            EventType::Snapshot,
            serde_json::json!({
                "trigger": trigger,
                "state": state,
            }),
        )?;

        if id.is_some() {
            debug!("Captured {} snapshot", trigger);
        }
        Ok(id)
    }

    /// Capture, routing any failure through the closing policy
    pub async fn capture_or_report(&self, trigger: &str, origin: WriteOrigin) {
        if let Err(e) = self.capture(trigger, origin).await {
            self.policy
                .report(&format!("Failed to capture {} snapshot", trigger), &e);
        }
    }
}
