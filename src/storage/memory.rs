use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{BlobStore, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// In-process blob store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<BTreeMap<String, StoredBlob>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, path: &str) -> Option<StoredBlob> {
        self.blobs.lock().await.get(path).cloned()
    }

    /// Stored paths in sorted order
    pub async fn paths(&self) -> Vec<String> {
        self.blobs.lock().await.keys().cloned().collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .lock()
            .await
            .get(path)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn upload(&self, path: &str, content_type: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.blobs.lock().await.insert(
            path.to_string(),
            StoredBlob {
                content_type: content_type.to_string(),
                data,
            },
        );
        Ok(())
    }
}
