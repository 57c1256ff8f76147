// src/recording/blob_store.rs
//! Content-addressed blob storage
//!
//! Oversized payloads are written once per SHA-256 digest as
//! `blobs/<digest>.blob`. A repeated store of the same bytes returns the
//! cached digest without touching the sink.

use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// File extension of stored blobs
pub const BLOB_EXTENSION: &str = "blob";

/// Destination for blob bytes
pub trait BlobSink: Send + Sync {
    /// Persist `content` under `digest`
    fn write_blob(&self, digest: &str, content: &[u8]) -> std::io::Result<()>;
}

/// Writes blobs into a directory
#[derive(Debug, Clone)]
pub struct FsBlobSink {
    dir: PathBuf,
}

impl FsBlobSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the blob with this digest
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        blob_path(&self.dir, digest)
    }
}

impl BlobSink for FsBlobSink {
    fn write_blob(&self, digest: &str, content: &[u8]) -> std::io::Result<()> {
        let final_path = self.blob_path(digest);
        let tmp_path = final_path.with_extension("blob.tmp");

        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &final_path)
    }
}

/// Keeps blobs in memory and counts writes
#[derive(Debug, Default)]
pub struct MemoryBlobSink {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryBlobSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write_blob` calls
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Stored bytes for a digest
    pub fn get(&self, digest: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(digest).cloned()
    }
}

impl BlobSink for MemoryBlobSink {
    fn write_blob(&self, digest: &str, content: &[u8]) -> std::io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.blobs.lock().insert(digest.to_string(), content.to_vec());
        Ok(())
    }
}

/// Path of a blob inside a blob directory
pub fn blob_path(dir: &Path, digest: &str) -> PathBuf {
    dir.join(format!("{}.{}", digest, BLOB_EXTENSION))
}

/// Hex-encoded SHA-256 of `content`
pub fn content_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Deduplicating blob store for one session
pub struct BlobStore {
    sink: Arc<dyn BlobSink>,
    seen: Mutex<HashSet<String>>,
}

impl BlobStore {
    /// Create a store writing into `sink`
    pub fn new(sink: Arc<dyn BlobSink>) -> Self {
        Self {
            sink,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Create a store backed by a directory, creating it if needed
    pub fn open_dir(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| EngineError::storage("Failed to create blob directory", e))?;
        Ok(Self::new(Arc::new(FsBlobSink::new(dir))))
    }

    /// Store `content`, returning its digest
    pub fn store(&self, content: &[u8]) -> Result<String> {
        let digest = content_digest(content);

        // Check-then-write happens under one lock so concurrent stores of the
        // same bytes produce a single write.
        let mut seen = self.seen.lock();
        if seen.contains(&digest) {
            debug!("Blob already stored: {}", digest);
            metrics::counter!("capture_blob_dedup_hits_total").increment(1);
            return Ok(digest);
        }

        if let Err(e) = self.sink.write_blob(&digest, content) {
            error!("Failed to store blob {}: {}", digest, e);
            metrics::counter!("capture_storage_failures_total").increment(1);
            return Err(EngineError::storage("Failed to write blob", e));
        }

        seen.insert(digest.clone());
        drop(seen);

        debug!("Stored blob {} ({} bytes)", digest, content.len());
        metrics::counter!("capture_blobs_stored_total").increment(1);

        Ok(digest)
    }

    /// Number of distinct blobs written
    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Whether a digest has been written
    pub fn contains(&self, digest: &str) -> bool {
        self.seen.lock().contains(digest)
    }
}
