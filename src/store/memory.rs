use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{AttachmentStore, AttachmentTx};
use crate::error::ThumbnailError;
use crate::models::{ImageAttachment, StoredThumbnailFormat};

/// In-process attachment store with one async mutex per attachment id.
/// Clones share the same records and locks.
#[derive(Debug, Clone, Default)]
pub struct MemoryAttachmentStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: Mutex<HashMap<i64, ImageAttachment>>,
    /// Only ids that are locked or waited on have an entry.
    locks: std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Inner {
    /// Drop the lock entry for `id` unless someone besides the caller's
    /// guard still holds it.
    fn release_lock(&self, id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) <= 2) {
            locks.remove(&id);
        }
    }
}

#[derive(Debug)]
enum Staged {
    Metadata(Vec<StoredThumbnailFormat>),
    Deleted,
}

#[derive(Debug)]
pub struct MemoryAttachmentTx {
    inner: Arc<Inner>,
    id: i64,
    staged: Option<Staged>,
    _lock: OwnedMutexGuard<()>,
}

impl MemoryAttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, attachment: ImageAttachment) {
        self.inner
            .records
            .lock()
            .await
            .insert(attachment.id, attachment);
    }

    /// Committed state of an attachment
    pub async fn get(&self, id: i64) -> Option<ImageAttachment> {
        self.inner.records.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl AttachmentStore for MemoryAttachmentStore {
    type Tx = MemoryAttachmentTx;

    async fn lock_attachment(
        &self,
        id: i64,
    ) -> Result<Option<(MemoryAttachmentTx, ImageAttachment)>, ThumbnailError> {
        let lock = self
            .inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;

        let Some(attachment) = self.get(id).await else {
            self.inner.release_lock(id);
            return Ok(None);
        };
        let tx = MemoryAttachmentTx {
            inner: self.inner.clone(),
            id,
            staged: None,
            _lock: guard,
        };
        Ok(Some((tx, attachment)))
    }
}

#[async_trait]
impl AttachmentTx for MemoryAttachmentTx {
    async fn persist_thumbnail_metadata(
        &mut self,
        attachment: &ImageAttachment,
    ) -> Result<(), ThumbnailError> {
        self.staged = Some(Staged::Metadata(attachment.thumbnail_metadata.clone()));
        Ok(())
    }

    async fn delete_attachment(
        &mut self,
        _attachment: &ImageAttachment,
    ) -> Result<(), ThumbnailError> {
        self.staged = Some(Staged::Deleted);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), ThumbnailError> {
        let mut records = self.inner.records.lock().await;
        match self.staged.take() {
            Some(Staged::Metadata(metadata)) => {
                if let Some(record) = records.get_mut(&self.id) {
                    record.thumbnail_metadata = metadata;
                }
            }
            Some(Staged::Deleted) => {
                records.remove(&self.id);
            }
            None => {}
        }
        Ok(())
    }
}

impl Drop for MemoryAttachmentTx {
    fn drop(&mut self) {
        self.inner.release_lock(self.id);
    }
}
