use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use super::{BlobStore, StorageError};

/// Blob store backed by a directory on local disk.
///
/// Content types are not persisted; they are implied by the extension.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf) -> Self {
        LocalBlobStore { root }
    }

    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        // Path traversal protection
        let relative = Path::new(path);
        if path.contains('\0')
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.full_path(path)?;
        match tokio::fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(
        &self,
        path: &str,
        _content_type: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        let full_path = self.full_path(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full_path, data).await?;
        Ok(())
    }
}
