// src/recording/mod.rs
//! Event recording and storage
//!
//! This module owns everything that ends up on disk for a session:
//!
//! - **Event**: the record schema and event vocabulary
//! - **Event Log**: append-only NDJSON writer assigning monotonic ids
//! - **Blob Store**: SHA-256 addressed storage for oversized fields
//! - **HAR**: rebuilds `recording.har` from the log when the native export is missing
//! - **Metadata**: the `metadata.json` summary written at session end
//!
//! # Architecture
//!
//! ```text
//! Trackers → EventLog::write() ──▶ offload (≥ threshold) ──▶ BlobStore
//!                   │                                         blobs/<sha256>.blob
//!                   ▼
//!          lock → id + timestamp → serialize → flush
//!                   │
//!                   ▼
//!             events.ndjson ──(stop, HAR missing)──▶ recording.har
//! ```

pub mod blob_store;
pub mod event;
pub mod event_log;
pub mod har;
pub mod metadata;

// Re-export commonly used types
pub use blob_store::{BlobSink, BlobStore, FsBlobSink, MemoryBlobSink};
pub use event::{Event, EventType};
pub use event_log::{BlobRef, EventLog, MemoryLogSink, OffloadConfig, WriteOrigin};
pub use har::{HarDocument, ReconstructionStats};
pub use metadata::SessionMetadata;
