//! Resize-and-upload pipeline
//!
//! For one locked attachment: work out which catalogue formats are missing,
//! fetch the original once, render and upload each missing format in
//! catalogue order, then write the accumulated metadata back in a single
//! update.
//!
//! A source that cannot be decoded ends the loop early. If the attachment
//! has never had a thumbnail, it is deleted so it is not retried forever;
//! otherwise whatever was rendered so far is kept.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::ImageError;
use image::error::{LimitError, LimitErrorKind};
use tracing::{error, info, warn};

use super::resize::{self, FrameLoad, RenderFn, RenderRequest};
use super::{OutputEncoding, ThumbnailFormat, missing_thumbnails, thumbnail_path};
use crate::error::ThumbnailError;
use crate::models::{ImageAttachment, StoredThumbnailFormat};
use crate::storage::{BlobStore, content_type_for};
use crate::store::{AttachmentStore, AttachmentTx};

#[derive(Clone)]
pub struct ThumbnailPipeline {
    catalogue: Arc<[ThumbnailFormat]>,
    blobs: Arc<dyn BlobStore>,
    render: RenderFn,
}

impl std::fmt::Debug for ThumbnailPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailPipeline")
            .field("catalogue", &self.catalogue)
            .finish_non_exhaustive()
    }
}

impl ThumbnailPipeline {
    pub fn new(catalogue: impl Into<Arc<[ThumbnailFormat]>>, blobs: Arc<dyn BlobStore>) -> Self {
        ThumbnailPipeline {
            catalogue: catalogue.into(),
            blobs,
            render: resize::render,
        }
    }

    /// Replace the renderer used for every format.
    pub fn with_render(mut self, render: RenderFn) -> Self {
        self.render = render;
        self
    }

    pub fn catalogue(&self) -> &[ThumbnailFormat] {
        &self.catalogue
    }

    /// Handle one "attachment changed" event: lock the attachment, ensure its
    /// thumbnails and commit. Returns `None` if the attachment is gone.
    pub async fn consume<S: AttachmentStore>(
        &self,
        store: &S,
        id: i64,
    ) -> Result<Option<usize>, ThumbnailError> {
        let start = Instant::now();
        let Some((mut tx, mut attachment)) = store.lock_attachment(id).await? else {
            info!("ImageAttachment row {} missing", id);
            return Ok(None);
        };

        let written = self.ensure_thumbnails(&mut tx, &mut attachment).await?;
        tx.commit().await?;

        info!(
            attachment_id = id,
            "Processed {} thumbnails ({}ms)",
            written,
            start.elapsed().as_millis()
        );
        Ok(Some(written))
    }

    /// Render, upload and record every missing thumbnail for `attachment`.
    /// Returns how many were written by this call.
    ///
    /// Changes are staged on `tx`; nothing is visible until the caller commits.
    pub async fn ensure_thumbnails<T: AttachmentTx>(
        &self,
        tx: &mut T,
        attachment: &mut ImageAttachment,
    ) -> Result<usize, ThumbnailError> {
        let needed = missing_thumbnails(attachment, &self.catalogue);
        if needed.is_empty() {
            return Ok(0);
        }

        let source = Bytes::from(self.blobs.read(&attachment.path_id).await?);

        let mut written = 0;
        for format in &needed {
            match self.write_thumbnail(&source, attachment, format).await {
                Ok(stored) => {
                    attachment.thumbnail_metadata.push(stored);
                    written += 1;
                }
                Err(e) if e.is_recoverable() => {
                    error!(
                        attachment_id = attachment.id,
                        format = %format,
                        "failed to render thumbnail: {}",
                        e
                    );
                    if written == 0 && attachment.thumbnail_metadata.is_empty() {
                        // Never thumbnailed; most likely bad data.
                        warn!(
                            attachment_id = attachment.id,
                            "deleting image attachment that cannot be thumbnailed"
                        );
                        tx.delete_attachment(attachment).await?;
                        return Ok(0);
                    }
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        tx.persist_thumbnail_metadata(attachment).await?;
        Ok(written)
    }

    async fn write_thumbnail(
        &self,
        source: &Bytes,
        attachment: &ImageAttachment,
        format: &ThumbnailFormat,
    ) -> Result<StoredThumbnailFormat, ThumbnailError> {
        let encoding = OutputEncoding::for_format(format)?;
        let content_type = content_type_for(format.extension)
            .ok_or_else(|| ThumbnailError::config(format, "unknown content type"))?;

        info!(
            "Resizing to {} x {}, from {} x {}",
            format.max_width,
            format.max_height,
            attachment.original_width_px,
            attachment.original_height_px
        );
        let request = RenderRequest {
            load: FrameLoad::for_format(attachment.frames, format.animated),
            max_width: format.max_width,
            max_height: format.max_height,
            encoding,
        };
        let render = self.render;
        let source = source.clone();
        let rendered = tokio::task::spawn_blocking(move || render(&source, &request)).await??;

        // Animated outputs record the height of all frames stacked together.
        let height = if format.animated {
            rendered
                .height
                .checked_mul(rendered.frame_count)
                .ok_or_else(|| {
                    ImageError::Limits(LimitError::from_kind(LimitErrorKind::DimensionError))
                })?
        } else {
            rendered.height
        };

        let path = thumbnail_path(attachment, format);
        let byte_size = rendered.bytes.len();
        info!("Uploading {} bytes to {}", byte_size, path);
        self.blobs.upload(&path, content_type, rendered.bytes).await?;

        Ok(StoredThumbnailFormat::new(
            format,
            content_type,
            rendered.width,
            height,
            byte_size,
        ))
    }
}
