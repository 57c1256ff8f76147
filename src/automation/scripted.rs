// src/automation/scripted.rs
//! In-memory automation target
//!
//! Answers the engine's page scripts (instrumentation, buffer drain and ack,
//! snapshot, health probe) from local state and lets callers inject raw
//! callbacks. Used for offline replays and the test suite.

use crate::automation::raw::RawEvent;
use crate::automation::target::{AutomationTarget, BLANK_PAGE};
use crate::session::health::PROBE_SCRIPT;
use crate::tracking::dom_bridge::{ACK_SCRIPT, DRAIN_SCRIPT, INSTALL_SCRIPT};
use crate::tracking::snapshot::SNAPSHOT_SCRIPT;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct PageState {
    url: Option<String>,
    title: String,
    closed: bool,
    installed: bool,
    dom_events: Vec<Value>,
    next_dom_id: u64,
    fail_acks: bool,
    local_storage: Map<String, Value>,
    session_storage: Map<String, Value>,
    cookies: String,
    har_path: Option<PathBuf>,
    sender: Option<mpsc::UnboundedSender<RawEvent>>,
}

/// Page and recording context held entirely in memory
pub struct ScriptedTarget {
    state: Mutex<PageState>,
    hung: AtomicBool,
    har_export: AtomicBool,
    evaluations: AtomicUsize,
}

impl Default for ScriptedTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTarget {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PageState::default()),
            hung: AtomicBool::new(false),
            har_export: AtomicBool::new(true),
            evaluations: AtomicUsize::new(0),
        }
    }

    /// Do not write the native HAR export on close
    pub fn without_har_export(self) -> Self {
        self.har_export.store(false, Ordering::SeqCst);
        self
    }

    /// Deliver a raw callback; false when nothing is attached
    pub fn emit(&self, event: RawEvent) -> bool {
        let state = self.state.lock();
        match &state.sender {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Buffer a page-side interaction event, returning its client id
    pub fn push_dom_event(&self, kind: &str, data: Value) -> u64 {
        let mut state = self.state.lock();
        state.next_dom_id += 1;
        let id = state.next_dom_id;
        state.dom_events.push(json!({
            "type": kind,
            "eventId": id,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "data": data,
        }));
        id
    }

    pub fn buffered_dom_events(&self) -> usize {
        self.state.lock().dom_events.len()
    }

    /// Make buffer acknowledgements fail
    pub fn fail_acks(&self, fail: bool) {
        self.state.lock().fail_acks = fail;
    }

    /// Stop answering: every call pends forever
    pub fn hang(&self, hung: bool) {
        self.hung.store(hung, Ordering::SeqCst);
    }

    /// Close the page out from under the session
    pub fn crash(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.sender = None;
    }

    pub fn set_title(&self, title: &str) {
        self.state.lock().title = title.to_string();
    }

    pub fn set_local_storage(&self, key: &str, value: &str) {
        self.state
            .lock()
            .local_storage
            .insert(key.to_string(), json!(value));
    }

    pub fn set_session_storage(&self, key: &str, value: &str) {
        self.state
            .lock()
            .session_storage
            .insert(key.to_string(), json!(value));
    }

    pub fn set_cookies(&self, cookies: &str) {
        self.state.lock().cookies = cookies.to_string();
    }

    pub fn is_instrumented(&self) -> bool {
        self.state.lock().installed
    }

    /// Number of scripts evaluated so far
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    async fn stall_if_hung(&self) {
        if self.hung.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
    }

    fn ensure_open(state: &PageState) -> Result<()> {
        if state.closed {
            return Err(EngineError::TargetClosed("Target closed".to_string()));
        }
        Ok(())
    }

    fn snapshot_state(state: &PageState) -> Value {
        json!({
            "url": state.url.clone().unwrap_or_default(),
            "title": state.title,
            "readyState": "complete",
            "localStorage": state.local_storage,
            "sessionStorage": state.session_storage,
            "cookies": state.cookies,
        })
    }
}

#[async_trait]
impl AutomationTarget for ScriptedTarget {
    async fn attach(&self, har_path: &Path) -> Result<mpsc::UnboundedReceiver<RawEvent>> {
        self.stall_if_hung().await;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        let (tx, rx) = mpsc::unbounded_channel();
        state.sender = Some(tx);
        state.url = Some(BLANK_PAGE.to_string());
        state.har_path = Some(har_path.to_path_buf());
        Ok(rx)
    }

    async fn navigate(&self, url: &str) -> Result<Option<u16>> {
        self.stall_if_hung().await;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        state.url = Some(url.to_string());
        if let Some(tx) = &state.sender {
            let _ = tx.send(RawEvent::FrameNavigated {
                url: url.to_string(),
                main_frame: true,
            });
        }
        Ok(Some(200))
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value> {
        self.stall_if_hung().await;
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        let result = if script == INSTALL_SCRIPT {
            state.installed = true;
            Value::Null
        } else if script == DRAIN_SCRIPT {
            Value::Array(state.dom_events.clone())
        } else if script == ACK_SCRIPT {
            if state.fail_acks {
                return Err(EngineError::ExternalTarget(
                    "Execution context was destroyed".to_string(),
                ));
            }
            let max_id = arg.as_u64().unwrap_or(0);
            state
                .dom_events
                .retain(|e| e["eventId"].as_u64().unwrap_or(0) > max_id);
            Value::Null
        } else if script == SNAPSHOT_SCRIPT {
            Self::snapshot_state(&state)
        } else if script == PROBE_SCRIPT {
            json!("complete")
        } else {
            debug!("Unrecognized script evaluated");
            Value::Null
        };

        Ok(result)
    }

    fn current_url(&self) -> Option<String> {
        self.state.lock().url.clone()
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn close(&self) -> Result<()> {
        self.stall_if_hung().await;
        let har_path = {
            let mut state = self.state.lock();
            state.closed = true;
            state.sender = None;
            state.har_path.clone()
        };

        if let (true, Some(path)) = (self.har_export.load(Ordering::SeqCst), har_path) {
            let har = json!({
                "log": {
                    "version": "1.2",
                    "creator": { "name": "scripted", "version": env!("CARGO_PKG_VERSION") },
                    "entries": []
                }
            });
            std::fs::write(&path, har.to_string())
                .map_err(|e| EngineError::ExternalTarget(format!("HAR export failed: {}", e)))?;
        }
        Ok(())
    }
}
