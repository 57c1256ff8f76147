// src/tracking/websocket.rs
//! Websocket lifecycle and frame tracking
//!
//! Connections are registered by the engine's opaque key and given a
//! session-scoped id (`ws_1`, `ws_2`, ...). Frames are dropped once the
//! session is closing or when their connection is unknown.

use crate::automation::raw::{ConnectionKey, FrameDirection, FramePayload};
use crate::recording::event::EventType;
use crate::recording::event_log::{BlobRef, EventLog};
use crate::session::policy::ClosingPolicy;
use crate::tracking::request::UNREADABLE_MARKER;
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Connection {
    ws_id: String,
    url: String,
}

pub struct WebSocketTracker {
    log: Arc<EventLog>,
    policy: ClosingPolicy,
    connections: DashMap<ConnectionKey, Connection>,
    opened: AtomicU64,
}

impl WebSocketTracker {
    pub fn new(log: Arc<EventLog>, policy: ClosingPolicy) -> Self {
        Self {
            log,
            policy,
            connections: DashMap::new(),
            opened: AtomicU64::new(0),
        }
    }

    pub fn on_open(&self, key: ConnectionKey, url: &str) -> Result<Option<String>> {
        if !self.policy.accepts_producer_events() {
            self.policy.dropped("websocket_connect");
            return Ok(None);
        }

        let ws_id = format!("ws_{}", self.opened.fetch_add(1, Ordering::Relaxed) + 1);
        self.connections.insert(
            key,
            Connection {
                ws_id: ws_id.clone(),
                url: url.to_string(),
            },
        );
        debug!("Websocket {} opened: {}", ws_id, url);

        self.log.write(
            EventType::WebsocketConnect,
            json!({
                "ws_id": ws_id,
                "url": url,
            }),
        )
    }

    pub fn on_frame(
        &self,
        key: ConnectionKey,
        direction: FrameDirection,
        payload: &FramePayload,
    ) -> Result<Option<String>> {
        if !self.policy.accepts_producer_events() {
            self.policy.dropped("websocket frame");
            return Ok(None);
        }

        let ws_id = match self.connections.get(&key) {
            Some(conn) => conn.ws_id.clone(),
            None => {
                return Err(EngineError::Producer(format!(
                    "Frame for unknown websocket {:?}",
                    key
                )))
            }
        };

        let threshold = self.log.offload_config().threshold_bytes;
        let (payload, opcode, is_blob) = match payload {
            FramePayload::Text(text) => (json!(text), "text", text.len() >= threshold),
            FramePayload::Binary(bytes) => match self.log.store_blob(bytes) {
                Ok(digest) => (BlobRef::binary(digest, bytes.len()).to_value(), "binary", true),
                Err(e) => {
                    self.policy.report("Failed to store binary frame", &e);
                    (json!(UNREADABLE_MARKER), "binary", false)
                }
            },
        };

        let event_type = match direction {
            FrameDirection::Sent => EventType::WebsocketSend,
            FrameDirection::Received => EventType::WebsocketReceive,
        };

        self.log.write(
            event_type,
            json!({
                "ws_id": ws_id,
                "opcode": opcode,
                "payload": payload,
                "is_blob": is_blob,
            }),
        )
    }

    pub fn on_close(&self, key: ConnectionKey) -> Result<Option<String>> {
        let Some((_, conn)) = self.connections.remove(&key) else {
            return Err(EngineError::Producer(format!(
                "Close for unknown websocket {:?}",
                key
            )));
        };
        debug!("Websocket {} closed", conn.ws_id);

        self.log.write(
            EventType::WebsocketClose,
            json!({
                "ws_id": conn.ws_id,
                "url": conn.url,
            }),
        )
    }

    /// Connections opened during the session
    pub fn total(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    /// Connections currently open
    pub fn open_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::blob_store::{BlobSink, BlobStore, MemoryBlobSink};
    use crate::recording::event_log::{MemoryLogSink, OffloadConfig};
    use crate::session::state::{PhaseCell, SessionPhase};
    use crate::utils::clock::SystemClock;
    use bytes::Bytes;

    struct FullDisk;

    impl BlobSink for FullDisk {
        fn write_blob(&self, _digest: &str, _content: &[u8]) -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        }
    }

    fn tracker() -> (WebSocketTracker, PhaseCell, MemoryLogSink) {
        tracker_with(Arc::new(MemoryBlobSink::new()))
    }

    fn tracker_with(blob_sink: Arc<dyn BlobSink>) -> (WebSocketTracker, PhaseCell, MemoryLogSink) {
        let cell = PhaseCell::new();
        cell.transition(SessionPhase::Idle, SessionPhase::Opening).unwrap();
        cell.transition(SessionPhase::Opening, SessionPhase::Recording).unwrap();
        let policy = ClosingPolicy::new(cell.clone());
        let sink = MemoryLogSink::new();
        let log = Arc::new(EventLog::new(
            "s1",
            Box::new(sink.clone()),
            Arc::new(BlobStore::new(blob_sink)),
            policy.clone(),
            Arc::new(SystemClock),
            OffloadConfig {
                threshold_bytes: 16,
                preview_chars: 4,
            },
        ));
        (WebSocketTracker::new(log, policy), cell, sink)
    }

    #[test]
    fn test_connection_lifecycle() {
        let (ws, _, sink) = tracker();
        let key = ConnectionKey(7);
        ws.on_open(key, "wss://example.com/live").unwrap();
        ws.on_frame(key, FrameDirection::Sent, &FramePayload::Text("hi".into()))
            .unwrap();
        ws.on_frame(
            key,
            FrameDirection::Received,
            &FramePayload::Binary(Bytes::from_static(b"\x00\x01")),
        )
        .unwrap();
        ws.on_close(key).unwrap();

        let events = sink.events();
        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                EventType::WebsocketConnect,
                EventType::WebsocketSend,
                EventType::WebsocketReceive,
                EventType::WebsocketClose
            ]
        );
        assert!(events.iter().all(|e| e.data["ws_id"] == json!("ws_1")));
        assert_eq!(events[1].data["payload"], json!("hi"));
        assert_eq!(events[2].data["is_blob"], json!(true));
        assert_eq!(ws.total(), 1);
        assert_eq!(ws.open_count(), 0);
    }

    #[test]
    fn test_large_text_frame_is_offloaded() {
        let (ws, _, sink) = tracker();
        let key = ConnectionKey(1);
        ws.on_open(key, "wss://example.com").unwrap();
        ws.on_frame(key, FrameDirection::Received, &FramePayload::Text("x".repeat(16)))
            .unwrap();

        let events = sink.events();
        assert_eq!(events[1].data["is_blob"], json!(true));
        assert_eq!(events[1].data["payload"]["size"], json!(16));
    }

    #[test]
    fn test_unknown_connection_is_producer_error() {
        let (ws, _, _) = tracker();
        let err = ws
            .on_frame(ConnectionKey(9), FrameDirection::Sent, &FramePayload::Text("x".into()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Producer(_)));
    }

    #[test]
    fn test_frames_dropped_while_closing() {
        let (ws, cell, sink) = tracker();
        let key = ConnectionKey(1);
        ws.on_open(key, "wss://example.com").unwrap();
        cell.transition(SessionPhase::Recording, SessionPhase::Closing).unwrap();

        let id = ws
            .on_frame(key, FrameDirection::Received, &FramePayload::Text("late".into()))
            .unwrap();
        assert!(id.is_none());
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_binary_frame_kept_when_blob_write_fails() {
        let (ws, _, sink) = tracker_with(Arc::new(FullDisk));
        let key = ConnectionKey(3);
        ws.on_open(key, "wss://example.com/feed").unwrap();

        let id = ws
            .on_frame(
                key,
                FrameDirection::Received,
                &FramePayload::Binary(Bytes::from_static(b"\x00\xff")),
            )
            .unwrap();
        assert!(id.is_some());

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::WebsocketReceive);
        assert_eq!(events[1].data["payload"], json!(UNREADABLE_MARKER));
        assert_eq!(events[1].data["opcode"], json!("binary"));
        assert_eq!(events[1].data["is_blob"], json!(false));
        assert_eq!(ws.log.blob_failures(), 1);
    }
}
