use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;

use super::{AttachmentStore, AttachmentTx};
use crate::domain::image_attachments;
use crate::error::ThumbnailError;
use crate::models::ImageAttachment;

/// Attachment store backed by the `image_attachments` table.
///
/// The lock is a `SELECT ... FOR UPDATE` row lock, held by the transaction
/// inside [`PgAttachmentTx`].
#[derive(Debug, Clone)]
pub struct PgAttachmentStore {
    pool: PgPool,
}

impl PgAttachmentStore {
    pub fn new(pool: PgPool) -> Self {
        PgAttachmentStore { pool }
    }
}

#[derive(Debug)]
pub struct PgAttachmentTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AttachmentStore for PgAttachmentStore {
    type Tx = PgAttachmentTx;

    async fn lock_attachment(
        &self,
        id: i64,
    ) -> Result<Option<(PgAttachmentTx, ImageAttachment)>, ThumbnailError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = image_attachments::lock_image_attachment(&mut *tx, id).await? else {
            return Ok(None);
        };
        let attachment = ImageAttachment::try_from(row)?;
        Ok(Some((PgAttachmentTx { tx }, attachment)))
    }
}

#[async_trait]
impl AttachmentTx for PgAttachmentTx {
    async fn persist_thumbnail_metadata(
        &mut self,
        attachment: &ImageAttachment,
    ) -> Result<(), ThumbnailError> {
        image_attachments::update_thumbnail_metadata(
            &mut *self.tx,
            attachment.id,
            &attachment.thumbnail_metadata,
        )
        .await?;
        Ok(())
    }

    async fn delete_attachment(
        &mut self,
        attachment: &ImageAttachment,
    ) -> Result<(), ThumbnailError> {
        let deleted = image_attachments::delete_image_attachment(&mut *self.tx, attachment.id).await?;
        if deleted == 0 {
            warn!(attachment_id = attachment.id, "image attachment already gone at delete");
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), ThumbnailError> {
        self.tx.commit().await?;
        Ok(())
    }
}
