// src/tracking/dom_bridge.rs
//! Client-side interaction bridge
//!
//! An instrumentation script buffers clicks, inputs, submits, history
//! navigation and storage writes in the page. The bridge polls that buffer,
//! logs every event, and only then acknowledges the batch by removing events
//! up to the highest logged client id. A poll that fails part-way leaves the
//! buffer untouched, so the next poll re-reads it (at-least-once; the client
//! id is a unique key downstream).

use crate::automation::{with_timeout, AutomationTarget};
use crate::recording::event::EventType;
use crate::recording::event_log::{EventLog, WriteOrigin};
use crate::session::policy::ClosingPolicy;
use crate::utils::errors::{EngineError, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Installs the page-side buffer and listeners. Idempotent.
pub const INSTALL_SCRIPT: &str = r#"() => {
  if (window.__harflowInstalled) { return; }
  window.__harflowInstalled = true;
  window.__harflowEvents = [];
  window.__harflowNextId = 0;
  const push = (type, data) => window.__harflowEvents.push({
    type, eventId: ++window.__harflowNextId, timestamp: new Date().toISOString(), data
  });
  const attrs = (el) => Object.fromEntries([...(el.attributes || [])].map(a => [a.name, a.value]));
  document.addEventListener('click', (e) => {
    const t = e.target; const r = t.getBoundingClientRect ? t.getBoundingClientRect() : {};
    push('dom_click', {
      tagName: t.tagName, id: t.id || null, className: t.className || null,
      text: t.innerText || null, html: t.outerHTML, href: t.href || null,
      x: e.clientX, y: e.clientY, screenX: e.screenX, screenY: e.screenY,
      boundingRect: { top: r.top, left: r.left, width: r.width, height: r.height },
      modifiers: { ctrlKey: e.ctrlKey, shiftKey: e.shiftKey, altKey: e.altKey, metaKey: e.metaKey }
    });
  }, true);
  document.addEventListener('input', (e) => {
    const t = e.target;
    push('dom_input', {
      tagName: t.tagName, id: t.id || null, name: t.name || null, type: t.type || null,
      value: t.value ?? null, valueLength: t.value ? t.value.length : 0,
      placeholder: t.placeholder || null, attributes: attrs(t)
    });
  }, true);
  document.addEventListener('submit', (e) => {
    const f = e.target; const fields = {};
    for (const [k, v] of new FormData(f).entries()) {
      fields[k] = (v instanceof File) ? { type: 'file', name: v.name, size: v.size, mimeType: v.type } : v;
    }
    push('dom_submit', {
      formId: f.id || null, formAction: f.action || null, formMethod: f.method || null,
      formEnctype: f.enctype || null, formTarget: f.target || null,
      formFields: fields, formHTML: f.outerHTML
    });
  }, true);
  for (const kind of ['pushState', 'replaceState']) {
    const original = history[kind];
    history[kind] = function (state, title, url) {
      push('navigation_' + kind.toLowerCase(), { url: url ?? null, state, title });
      return original.apply(history, arguments);
    };
  }
  window.addEventListener('popstate', (e) => push('navigation_popstate', { url: location.href, state: e.state }));
  window.addEventListener('storage', (e) => push('storage_change', {
    key: e.key, oldValue: e.oldValue, newValue: e.newValue, url: e.url,
    storageArea: e.storageArea === localStorage ? 'local' : 'session'
  }));
  const setItem = Storage.prototype.setItem;
  Storage.prototype.setItem = function (key, value) {
    push('storage_write', {
      storageType: this === localStorage ? 'local' : 'session',
      key, value, valueLength: value ? String(value).length : 0
    });
    return setItem.apply(this, arguments);
  };
}"#;

/// Returns a copy of the buffered events
pub const DRAIN_SCRIPT: &str = "() => (window.__harflowEvents || []).slice()";

/// Removes buffered events up to and including the given client id
pub const ACK_SCRIPT: &str = "(maxId) => { window.__harflowEvents = (window.__harflowEvents || []).filter(e => e.eventId > maxId); }";

/// One buffered page-side event
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub event_id: u64,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Result of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub received: usize,
    pub logged: usize,
    pub acknowledged: bool,
}

/// Map a client event type onto the log vocabulary
fn classify(kind: &str) -> Option<(EventType, Option<&str>)> {
    let mapped = match kind {
        "dom_click" => (EventType::DomClick, None),
        "dom_input" => (EventType::DomInput, None),
        "dom_submit" => (EventType::DomSubmit, None),
        "storage_write" => (EventType::StorageWrite, None),
        "storage_change" => (EventType::StorageChange, None),
        "navigation_pushstate" => (EventType::Navigation, Some("pushstate")),
        "navigation_replacestate" => (EventType::Navigation, Some("replacestate")),
        "navigation_popstate" => (EventType::Navigation, Some("popstate")),
        _ => return None,
    };
    Some(mapped)
}

/// Polls and acknowledges the page-side event buffer
pub struct DomBridge {
    target: Arc<dyn AutomationTarget>,
    log: Arc<EventLog>,
    policy: ClosingPolicy,
    timeout: Duration,
    /// One drain at a time, so a batch is never read twice before its ack
    drain_lock: tokio::sync::Mutex<()>,
}

impl DomBridge {
    pub fn new(
        target: Arc<dyn AutomationTarget>,
        log: Arc<EventLog>,
        policy: ClosingPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            target,
            log,
            policy,
            timeout,
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Inject the instrumentation script
    pub async fn install(&self) -> Result<()> {
        with_timeout(
            self.timeout,
            "install instrumentation",
            self.target.evaluate(INSTALL_SCRIPT, serde_json::Value::Null),
        )
        .await?;
        info!("DOM instrumentation installed");
        Ok(())
    }

    /// Log every buffered event, then acknowledge the batch
    pub async fn drain(&self, origin: WriteOrigin) -> Result<DrainStats> {
        let mut stats = DrainStats::default();
        let _guard = self.drain_lock.lock().await;

        if self.target.is_closed() {
            debug!("Page closed, skipping DOM drain");
            return Ok(stats);
        }

        let raw = with_timeout(
            self.timeout,
            "poll DOM events",
            self.target.evaluate(DRAIN_SCRIPT, serde_json::Value::Null),
        )
        .await?;

        let batch = match raw {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Null => Vec::new(),
            other => {
                return Err(EngineError::Producer(format!(
                    "DOM buffer is not an array: {}",
                    other
                )))
            }
        };

        if batch.is_empty() {
            return Ok(stats);
        }
        stats.received = batch.len();
        debug!("Collected {} DOM events", batch.len());

        let mut max_id = None;
        for item in batch {
            let event: ClientEvent = match serde_json::from_value(item) {
                Ok(event) => event,
                Err(e) => {
                    self.policy
                        .report("Malformed DOM event", &EngineError::Producer(e.to_string()));
                    continue;
                }
            };

            if let Some((event_type, data)) = normalize(&event) {
                // Storage failures abort before the ack so the batch is re-read
                match self.log.append(origin, event_type, data)? {
                    Some(_) => stats.logged += 1,
                    None => {
                        debug!("Log no longer accepting DOM events, leaving batch buffered");
                        return Ok(stats);
                    }
                }
            } else {
                self.policy.report(
                    "Unknown DOM event type",
                    &EngineError::Producer(event.kind.clone()),
                );
            }

            max_id = max_id.max(Some(event.event_id));
        }

        if let Some(max_id) = max_id {
            match with_timeout(
                self.timeout,
                "acknowledge DOM events",
                self.target.evaluate(ACK_SCRIPT, serde_json::json!(max_id)),
            )
            .await
            {
                Ok(_) => stats.acknowledged = true,
                Err(e) => self.policy.report("Failed to acknowledge DOM events", &e),
            }
        }

        Ok(stats)
    }
}

/// Log payload for a client event, tagged with its client id
fn normalize(event: &ClientEvent) -> Option<(EventType, serde_json::Value)> {
    let (event_type, kind) = classify(&event.kind)?;

    let mut data = match &event.data {
        serde_json::Value::Object(map) => map.clone(),
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    };
    data.insert("client_event_id".to_string(), serde_json::json!(event.event_id));
    if let Some(ts) = &event.timestamp {
        data.insert("client_timestamp".to_string(), serde_json::json!(ts));
    }
    if let Some(kind) = kind {
        data.insert("kind".to_string(), serde_json::json!(kind));
    }

    Some((event_type, serde_json::Value::Object(data)))
}
