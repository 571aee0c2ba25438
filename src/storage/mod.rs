//! Blob storage for original uploads and rendered thumbnails.
//!
//! Backends:
//! - **Local disk**: [`LocalBlobStore`], rooted at `LOCAL_STORAGE_PATH`
//! - **GCS**: [`GcsBlobStore`], used when no local path is configured
//! - **Memory**: [`MemoryBlobStore`], for tests

mod gcs;
mod local;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::WorkerConfig;

pub use gcs::GcsBlobStore;
pub use local::LocalBlobStore;
pub use memory::{MemoryBlobStore, StoredBlob};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gcs error: {0}")]
    Gcs(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("object not found: {0}")]
    NotFound(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the full contents stored at `path`.
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Store `data` at `path`, replacing anything already there.
    async fn upload(&self, path: &str, content_type: &str, data: Vec<u8>)
    -> Result<(), StorageError>;
}

/// Content type for a file extension, `None` if unknown.
pub fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "avif" => Some("image/avif"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// Pick the backend from config: local disk if a path is set, GCS otherwise.
pub async fn from_config(config: &WorkerConfig) -> Result<Arc<dyn BlobStore>, StorageError> {
    if let Some(root) = &config.local_storage_path {
        info!(root = %root.display(), "using local blob storage");
        return Ok(Arc::new(LocalBlobStore::new(root.clone())));
    }

    // GCS client uses GOOGLE_APPLICATION_CREDENTIALS env var
    let gcs = GcsBlobStore::connect(&config.bucket_name).await?;
    info!(bucket = %config.bucket_name, "using GCS blob storage");
    Ok(Arc::new(gcs))
}
