use async_trait::async_trait;
use bytes::Bytes;
use google_cloud_storage::client::Storage;

use super::{BlobStore, StorageError};

/// Blob store backed by a Google Cloud Storage bucket.
#[derive(Clone)]
pub struct GcsBlobStore {
    client: Storage,
    bucket: String,
}

impl std::fmt::Debug for GcsBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsBlobStore")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl GcsBlobStore {
    pub async fn connect(bucket_name: &str) -> Result<Self, StorageError> {
        let client = Storage::builder()
            .build()
            .await
            .map_err(|e| StorageError::Gcs(Box::new(e)))?;
        Ok(GcsBlobStore {
            client,
            bucket: format!("projects/_/buckets/{}", bucket_name),
        })
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let mut resp = self
            .client
            .read_object(&self.bucket, path)
            .send()
            .await
            .map_err(|e| StorageError::Gcs(Box::new(e)))?;
        let mut data = Vec::new();
        while let Some(chunk) = resp.next().await {
            data.extend_from_slice(&chunk.map_err(|e| StorageError::Gcs(Box::new(e)))?);
        }
        Ok(data)
    }

    async fn upload(&self, path: &str, content_type: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .write_object(&self.bucket, path, Bytes::from(data))
            .set_content_type(content_type)
            .send_buffered()
            .await
            .map_err(|e| StorageError::Gcs(Box::new(e)))?;
        Ok(())
    }
}
