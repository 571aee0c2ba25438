//! Locked access to image attachment records.
//!
//! A pipeline run holds an [`AttachmentTx`] from lock to commit, so at most
//! one run per attachment reads and rewrites its thumbnail metadata at a
//! time. Dropping a transaction without committing releases the lock and
//! discards every staged change.

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::error::ThumbnailError;
use crate::models::ImageAttachment;

pub use memory::{MemoryAttachmentStore, MemoryAttachmentTx};
pub use postgres::{PgAttachmentStore, PgAttachmentTx};

#[async_trait]
pub trait AttachmentStore: Send + Sync {
    type Tx: AttachmentTx;

    /// Take the exclusive lock on attachment `id` and read it.
    /// Returns `None` if the attachment no longer exists.
    async fn lock_attachment(
        &self,
        id: i64,
    ) -> Result<Option<(Self::Tx, ImageAttachment)>, ThumbnailError>;
}

#[async_trait]
pub trait AttachmentTx: Send {
    /// Stage an update of the thumbnail_metadata field only.
    async fn persist_thumbnail_metadata(
        &mut self,
        attachment: &ImageAttachment,
    ) -> Result<(), ThumbnailError>;

    async fn delete_attachment(&mut self, attachment: &ImageAttachment)
    -> Result<(), ThumbnailError>;

    /// Apply staged changes and release the lock.
    async fn commit(self) -> Result<(), ThumbnailError>;
}
