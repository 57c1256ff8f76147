// src/recording/event.rs
//! Event record written to `events.ndjson`

use serde::{Deserialize, Serialize};
use std::fmt;

/// One captured event, serialized as a single NDJSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// `<session_id>-<8-digit sequence>`
    pub id: String,

    /// ISO-8601 wall-clock time
    pub timestamp: String,

    /// Milliseconds since the Unix epoch, same instant as `timestamp`
    pub timestamp_ms: i64,

    /// Event type
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Type-specific payload
    pub data: serde_json::Value,
}

/// Event vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Request,
    Response,
    CookieSet,
    ConsoleMessage,
    PageError,
    WebsocketConnect,
    WebsocketSend,
    WebsocketReceive,
    WebsocketClose,
    Navigation,
    Snapshot,
    DomClick,
    DomInput,
    DomSubmit,
    StorageWrite,
    StorageChange,
    SessionStart,
    SessionEnd,
    AudioTranscriptChunk,
    AudioTranscript,
}

impl EventType {
    /// Wire name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Request => "request",
            EventType::Response => "response",
            EventType::CookieSet => "cookie_set",
            EventType::ConsoleMessage => "console_message",
            EventType::PageError => "page_error",
            EventType::WebsocketConnect => "websocket_connect",
            EventType::WebsocketSend => "websocket_send",
            EventType::WebsocketReceive => "websocket_receive",
            EventType::WebsocketClose => "websocket_close",
            EventType::Navigation => "navigation",
            EventType::Snapshot => "snapshot",
            EventType::DomClick => "dom_click",
            EventType::DomInput => "dom_input",
            EventType::DomSubmit => "dom_submit",
            EventType::StorageWrite => "storage_write",
            EventType::StorageChange => "storage_change",
            EventType::SessionStart => "session_start",
            EventType::SessionEnd => "session_end",
            EventType::AudioTranscriptChunk => "audio_transcript_chunk",
            EventType::AudioTranscript => "audio_transcript",
        }
    }

    /// Parse a wire name
    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format the monotonic event id
pub fn format_event_id(session_id: &str, sequence: u64) -> String {
    format!("{}-{:08}", session_id, sequence)
}

/// Extract the numeric sequence from an event id
pub fn parse_sequence(id: &str) -> Option<u64> {
    id.rsplit_once('-').and_then(|(_, seq)| seq.parse().ok())
}
