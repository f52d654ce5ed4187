//! Blob store contract for persisted work-item payloads.
//!
//! Payloads are written by the enqueueing side and only read here, keyed by
//! cluster id and blob key. A stored blob holds either a single payload or a
//! batch of payloads that share one queue message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Payload retrieved from blob storage.
#[derive(Debug, Clone)]
pub enum PersistedPayload {
    Single(Bytes),
    Batch(Vec<Bytes>),
}

#[derive(Debug, Error, Clone)]
pub enum BlobError {
    #[error("no persisted payload at key {0}")]
    NotFound(String),
    #[error("transient blob store failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn read_persisted_payload(
        &self,
        cluster_id: &str,
        blob_key: &str,
    ) -> Result<PersistedPayload, BlobError>;
}

/// In-memory blob store for tests and development.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<(String, String), PersistedPayload>>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn put_single(&self, cluster_id: &str, blob_key: &str, body: Bytes) {
        self.blobs.lock().unwrap().insert(
            (cluster_id.to_string(), blob_key.to_string()),
            PersistedPayload::Single(body),
        );
    }

    pub fn put_batch(&self, cluster_id: &str, blob_key: &str, items: Vec<Bytes>) {
        self.blobs.lock().unwrap().insert(
            (cluster_id.to_string(), blob_key.to_string()),
            PersistedPayload::Batch(items),
        );
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read_persisted_payload(
        &self,
        cluster_id: &str,
        blob_key: &str,
    ) -> Result<PersistedPayload, BlobError> {
        self.blobs
            .lock()
            .unwrap()
            .get(&(cluster_id.to_string(), blob_key.to_string()))
            .cloned()
            .ok_or_else(|| BlobError::NotFound(blob_key.to_string()))
    }
}
