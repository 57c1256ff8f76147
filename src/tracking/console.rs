// src/tracking/console.rs
//! Console messages and uncaught page errors

use crate::automation::raw::{RawConsoleMessage, RawPageError};
use crate::recording::event::EventType;
use crate::recording::event_log::EventLog;
use crate::utils::errors::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct ConsoleTracker {
    log: Arc<EventLog>,
    messages: AtomicU64,
}

impl ConsoleTracker {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self {
            log,
            messages: AtomicU64::new(0),
        }
    }

    pub fn on_message(&self, message: &RawConsoleMessage) -> Result<Option<String>> {
        let id = self.log.write(
            EventType::ConsoleMessage,
            serde_json::json!({
                "type": message.kind,
                "text": message.text,
                "location": message.location,
                "args": message.args,
            }),
        )?;
        if id.is_some() {
            self.messages.fetch_add(1, Ordering::Relaxed);
        }
        Ok(id)
    }

    pub fn on_page_error(&self, error: &RawPageError) -> Result<Option<String>> {
        self.log.write(
            EventType::PageError,
            serde_json::json!({
                "error": error.message,
                "type": error.name,
            }),
        )
    }

    pub fn count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::raw::SourceLocation;
    use crate::recording::blob_store::{BlobStore, MemoryBlobSink};
    use crate::recording::event_log::{MemoryLogSink, OffloadConfig};
    use crate::session::policy::ClosingPolicy;
    use crate::session::state::{PhaseCell, SessionPhase};
    use crate::utils::clock::SystemClock;
    use serde_json::json;

    #[test]
    fn test_console_and_page_error_shapes() {
        let cell = PhaseCell::new();
        cell.transition(SessionPhase::Idle, SessionPhase::Opening).unwrap();
        let sink = MemoryLogSink::new();
        let log = Arc::new(EventLog::new(
            "s1",
            Box::new(sink.clone()),
            Arc::new(BlobStore::new(Arc::new(MemoryBlobSink::new()))),
            ClosingPolicy::new(cell),
            Arc::new(SystemClock),
            OffloadConfig::default(),
        ));
        let tracker = ConsoleTracker::new(log);

        tracker
            .on_message(&RawConsoleMessage {
                kind: "warning".into(),
                text: "deprecated".into(),
                location: Some(SourceLocation {
                    url: "https://example.com/app.js".into(),
                    line_number: 10,
                    column_number: 4,
                }),
                args: vec!["deprecated".into()],
            })
            .unwrap();
        tracker
            .on_page_error(&RawPageError {
                message: "x is undefined".into(),
                name: "TypeError".into(),
            })
            .unwrap();

        let events = sink.events();
        assert_eq!(events[0].data["type"], json!("warning"));
        assert_eq!(events[0].data["location"]["lineNumber"], json!(10));
        assert_eq!(events[1].event_type, EventType::PageError);
        assert_eq!(events[1].data["type"], json!("TypeError"));
        assert_eq!(tracker.count(), 1);
    }
}
