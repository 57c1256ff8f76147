// src/automation/raw.rs
//! Raw callback events delivered by the automation engine
//!
//! These carry plain values only. Live engine objects (pages, requests,
//! sockets) never cross this boundary; websockets are identified by an
//! opaque [`ConnectionKey`] chosen by the engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Opaque per-connection key assigned by the automation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey(pub u64);

/// Body of a request or response as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawBody {
    /// No body, or the engine did not provide one
    Absent,
    Text(String),
    Binary(Bytes),
    /// The engine failed to read the body (compressed or binary post data)
    Unreadable,
}

/// Websocket frame payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Text(String),
    Binary(Bytes),
}

/// Direction of a websocket frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Sent,
    Received,
}

/// Source position of a console message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub url: String,
    pub line_number: u32,
    pub column_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawConsoleMessage {
    /// Severity: log, info, warning, error, debug, ...
    pub kind: String,
    pub text: String,
    pub location: Option<SourceLocation>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPageError {
    pub message: String,
    /// Error class name, e.g. `TypeError`
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub post_data: RawBody,
    pub resource_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub url: String,
    pub status: u16,
    pub status_text: String,
    /// Header pairs; `set-cookie` may repeat or hold newline-joined values
    pub headers: Vec<(String, String)>,
    pub body: RawBody,
}

/// One callback from the automation engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    Console(RawConsoleMessage),
    PageError(RawPageError),
    Request(RawRequest),
    Response(RawResponse),
    WebSocketOpened {
        connection: ConnectionKey,
        url: String,
    },
    WebSocketFrame {
        connection: ConnectionKey,
        direction: FrameDirection,
        payload: FramePayload,
    },
    WebSocketClosed {
        connection: ConnectionKey,
    },
    FrameNavigated {
        url: String,
        main_frame: bool,
    },
}

impl RawEvent {
    /// Short category name for logging
    pub fn category(&self) -> &'static str {
        match self {
            RawEvent::Console(_) => "console",
            RawEvent::PageError(_) => "pageerror",
            RawEvent::Request(_) => "request",
            RawEvent::Response(_) => "response",
            RawEvent::WebSocketOpened { .. } => "websocket",
            RawEvent::WebSocketFrame { .. } => "websocket_frame",
            RawEvent::WebSocketClosed { .. } => "websocket_close",
            RawEvent::FrameNavigated { .. } => "framenavigated",
        }
    }
}
