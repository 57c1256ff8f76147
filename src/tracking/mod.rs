// src/tracking/mod.rs
//! Event trackers
//!
//! Each tracker normalizes one family of raw callbacks into log events.
//! [`Trackers`] routes the raw stream and funnels every failure through the
//! session's closing policy, so a bad callback costs one event at most.

pub mod console;
pub mod cookie;
pub mod dom_bridge;
pub mod request;
pub mod snapshot;
pub mod websocket;

pub use console::ConsoleTracker;
pub use cookie::{parse_set_cookie, CookieMutation, CookieTracker, SetCookie};
pub use dom_bridge::{DomBridge, DrainStats};
pub use request::{RequestTracker, UNREADABLE_MARKER};
pub use snapshot::Snapshotter;
pub use websocket::WebSocketTracker;

use crate::automation::raw::RawEvent;
use crate::automation::BLANK_PAGE;
use crate::recording::event::EventType;
use crate::recording::event_log::EventLog;
use crate::session::policy::ClosingPolicy;
use crate::utils::clock::Clock;
use crate::utils::errors::Result;
use serde::Serialize;
use std::sync::Arc;

/// Running totals for status lines and `session_end`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub events: u64,
    pub requests: u64,
    pub websockets: u64,
    pub open_websockets: usize,
    pub console_messages: u64,
    pub cookies: usize,
    pub blobs: usize,
}

pub struct Trackers {
    pub requests: RequestTracker,
    pub cookies: CookieTracker,
    pub console: ConsoleTracker,
    pub websockets: WebSocketTracker,
    log: Arc<EventLog>,
    policy: ClosingPolicy,
}

impl Trackers {
    pub fn new(log: Arc<EventLog>, policy: ClosingPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: RequestTracker::new(log.clone(), policy.clone()),
            cookies: CookieTracker::new(log.clone(), clock),
            console: ConsoleTracker::new(log.clone()),
            websockets: WebSocketTracker::new(log.clone(), policy.clone()),
            log,
            policy,
        }
    }

    /// Route one raw callback
    ///
    /// Returns the URL of a logged main-frame navigation, which the caller
    /// follows up with a snapshot.
    pub fn dispatch(&self, event: RawEvent) -> Option<String> {
        let category = event.category();

        let result = match &event {
            RawEvent::Console(message) => self.console.on_message(message).map(|_| None),
            RawEvent::PageError(error) => self.console.on_page_error(error).map(|_| None),
            RawEvent::Request(request) => self.requests.on_request(request).map(|_| None),
            RawEvent::Response(response) => {
                if let Err(e) = self.cookies.on_response(response) {
                    self.policy.report("Failed to record cookies", &e);
                }
                self.requests.on_response(response).map(|_| None)
            }
            RawEvent::WebSocketOpened { connection, url } => {
                self.websockets.on_open(*connection, url).map(|_| None)
            }
            RawEvent::WebSocketFrame {
                connection,
                direction,
                payload,
            } => self
                .websockets
                .on_frame(*connection, *direction, payload)
                .map(|_| None),
            RawEvent::WebSocketClosed { connection } => {
                self.websockets.on_close(*connection).map(|_| None)
            }
            RawEvent::FrameNavigated { url, main_frame } => self.on_navigated(url, *main_frame),
        };

        match result {
            Ok(navigated) => navigated,
            Err(e) => {
                self.policy
                    .report(&format!("Failed to record {} event", category), &e);
                None
            }
        }
    }

    fn on_navigated(&self, url: &str, main_frame: bool) -> Result<Option<String>> {
        if !main_frame || url == BLANK_PAGE {
            return Ok(None);
        }

        let id = self.log.write(
            EventType::Navigation,
            serde_json::json!({
                "url": url,
                "kind": "main_frame",
            }),
        )?;
        Ok(id.map(|_| url.to_string()))
    }

    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            events: self.log.count(),
            requests: self.requests.count(),
            websockets: self.websockets.total(),
            open_websockets: self.websockets.open_count(),
            console_messages: self.console.count(),
            cookies: self.cookies.timeline_len(),
            blobs: self.log.blobs().count(),
        }
    }
}
