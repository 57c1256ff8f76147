// src/recording/event_log.rs
//! Append-only NDJSON event log
//!
//! The log is the single authority for event ids within a session. Every
//! write takes the writer lock, assigns the next sequence number and
//! timestamp, serializes one line and flushes it before releasing the lock,
//! so ids on disk are strictly increasing and a crash loses at most the
//! record being written.
//!
//! String fields at or above the blob threshold are moved to the
//! [`BlobStore`] before the lock is taken and replaced by a [`BlobRef`].

use crate::recording::blob_store::BlobStore;
use crate::recording::event::{format_event_id, Event, EventType};
use crate::session::policy::ClosingPolicy;
use crate::utils::clock::Clock;
use crate::utils::config::DEFAULT_BLOB_THRESHOLD;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Who is writing an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Tracker callbacks; dropped once the session is closing
    Producer,
    /// The session controller's own lifecycle and finalization writes
    Controller,
}

/// Inline replacement for an offloaded field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub stored_digest: String,
    pub preview: String,
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl BlobRef {
    /// Reference to binary content, which has no text preview
    pub fn binary(stored_digest: String, size: usize) -> Self {
        Self {
            stored_digest,
            preview: String::new(),
            size,
            encoding: Some("binary".to_string()),
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Offload settings
#[derive(Debug, Clone, Copy)]
pub struct OffloadConfig {
    pub threshold_bytes: usize,
    pub preview_chars: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: DEFAULT_BLOB_THRESHOLD,
            preview_chars: 256,
        }
    }
}

/// In-memory log destination, shareable with the test that reads it
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    /// Parsed events written so far
    pub fn events(&self) -> Vec<Event> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for MemoryLogSink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct LogWriter {
    sink: Option<Box<dyn Write + Send>>,
    sequence: u64,
}

/// Monotonic, flush-on-write event log for one session
pub struct EventLog {
    session_id: String,
    writer: Mutex<LogWriter>,
    blobs: Arc<BlobStore>,
    policy: ClosingPolicy,
    clock: Arc<dyn Clock>,
    offload: OffloadConfig,
    write_failures: AtomicU64,
    blob_failures: AtomicU64,
}

impl EventLog {
    /// Create a log writing into `sink`
    pub fn new(
        session_id: impl Into<String>,
        sink: Box<dyn Write + Send>,
        blobs: Arc<BlobStore>,
        policy: ClosingPolicy,
        clock: Arc<dyn Clock>,
        offload: OffloadConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            writer: Mutex::new(LogWriter {
                sink: Some(sink),
                sequence: 0,
            }),
            blobs,
            policy,
            clock,
            offload,
            write_failures: AtomicU64::new(0),
            blob_failures: AtomicU64::new(0),
        }
    }

    /// Create `path` (which must not exist yet) and log into it
    pub fn create(
        path: &Path,
        session_id: impl Into<String>,
        blobs: Arc<BlobStore>,
        policy: ClosingPolicy,
        clock: Arc<dyn Clock>,
        offload: OffloadConfig,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| EngineError::storage("Failed to open event log", e))?;

        debug!("Opened event log at {:?}", path);
        Ok(Self::new(session_id, Box::new(file), blobs, policy, clock, offload))
    }

    /// Write a producer event; `None` when the event was dropped
    pub fn write(&self, event_type: EventType, data: serde_json::Value) -> Result<Option<String>> {
        self.append(WriteOrigin::Producer, event_type, data)
    }

    /// Write an event on behalf of `origin`
    pub fn append(
        &self,
        origin: WriteOrigin,
        event_type: EventType,
        mut data: serde_json::Value,
    ) -> Result<Option<String>> {
        if origin == WriteOrigin::Producer && !self.policy.accepts_producer_events() {
            self.policy.dropped(event_type.as_str());
            return Ok(None);
        }

        self.offload_fields(&mut data);

        let mut writer = self.writer.lock();
        if writer.sink.is_none() {
            debug!("Event log closed, dropping {}", event_type);
            return Ok(None);
        }

        writer.sequence += 1;
        let now = self.clock.now();
        let event = Event {
            id: format_event_id(&self.session_id, writer.sequence),
            timestamp: now.to_rfc3339(),
            timestamp_ms: now.timestamp_millis(),
            event_type,
            data,
        };

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let result = match writer.sink.as_mut() {
            Some(sink) => sink.write_all(&line).and_then(|_| sink.flush()),
            None => Ok(()),
        };

        if let Err(e) = result {
            // Give the id back so the on-disk sequence has no gaps
            writer.sequence -= 1;
            drop(writer);
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("capture_storage_failures_total").increment(1);
            return Err(EngineError::storage("Failed to write event", e));
        }
        drop(writer);

        debug!("Wrote event {}: {}", event.id, event_type);
        metrics::counter!("capture_events_written_total").increment(1);

        Ok(Some(event.id))
    }

    /// Replace oversized strings anywhere in `value` with blob references
    fn offload_fields(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(s) if s.len() >= self.offload.threshold_bytes => {
                match self.blobs.store(s.as_bytes()) {
                    Ok(digest) => {
                        let blob = BlobRef {
                            stored_digest: digest,
                            preview: preview(s, self.offload.preview_chars),
                            size: s.len(),
                            encoding: None,
                        };
                        *value = blob.to_value();
                    }
                    Err(e) => {
                        // Keep the field inline rather than lose it
                        warn!("Blob offload failed, keeping {} bytes inline: {}", s.len(), e);
                        self.blob_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.offload_fields(item);
                }
            }
            serde_json::Value::Object(map) => {
                for (_, field) in map.iter_mut() {
                    self.offload_fields(field);
                }
            }
            _ => {}
        }
    }

    /// Flush and release the sink; later writes are dropped
    pub fn close(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if let Some(mut sink) = writer.sink.take() {
            sink.flush()
                .map_err(|e| EngineError::storage("Failed to flush event log", e))?;
            debug!("Closed event log after {} events", writer.sequence);
        }
        Ok(())
    }

    /// Whether the sink has been released
    pub fn is_closed(&self) -> bool {
        self.writer.lock().sink.is_none()
    }

    /// Number of events written
    pub fn count(&self) -> u64 {
        self.writer.lock().sequence
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The blob store used for offloading
    pub fn blobs(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// Store raw bytes as a blob, counting failures toward `blob_failures`
    pub fn store_blob(&self, content: &[u8]) -> Result<String> {
        self.blobs.store(content).map_err(|e| {
            self.blob_failures.fetch_add(1, Ordering::Relaxed);
            e
        })
    }

    pub fn offload_config(&self) -> OffloadConfig {
        self.offload
    }

    /// Failed event writes
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Failed blob writes, offloaded fields and binary payloads alike
    pub fn blob_failures(&self) -> u64 {
        self.blob_failures.load(Ordering::Relaxed)
    }
}

/// First `max_chars` characters of `s`
pub fn preview(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
