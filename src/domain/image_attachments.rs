//! Image attachment domain - DB queries for image_attachments
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).

use sqlx::types::Json;
use sqlx::{Executor, Postgres};

use crate::error::ThumbnailError;
use crate::models::{ImageAttachment, StoredThumbnailFormat};

#[derive(Debug, sqlx::FromRow)]
pub struct ImageAttachmentRow {
    pub id: i64,
    pub path_id: String,
    pub original_width_px: i32,
    pub original_height_px: i32,
    pub frames: i32,
    pub thumbnail_metadata: Json<Vec<StoredThumbnailFormat>>,
}

impl TryFrom<ImageAttachmentRow> for ImageAttachment {
    type Error = ThumbnailError;

    fn try_from(row: ImageAttachmentRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let positive = |value: i32, column: &str| {
            u32::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| ThumbnailError::InvalidRecord {
                    id,
                    reason: format!("{} must be positive, got {}", column, value),
                })
        };
        Ok(ImageAttachment {
            id,
            original_width_px: positive(row.original_width_px, "original_width_px")?,
            original_height_px: positive(row.original_height_px, "original_height_px")?,
            frames: positive(row.frames, "frames")?,
            path_id: row.path_id,
            thumbnail_metadata: row.thumbnail_metadata.0,
        })
    }
}

/// Read an image attachment and hold a row lock on it until the surrounding
/// transaction ends.
pub async fn lock_image_attachment<'e, E>(
    executor: E,
    id: i64,
) -> Result<Option<ImageAttachmentRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT id, path_id, original_width_px, original_height_px, frames, thumbnail_metadata
        FROM image_attachments
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Overwrite thumbnail_metadata, leaving every other column untouched
pub async fn update_thumbnail_metadata<'e, E>(
    executor: E,
    id: i64,
    metadata: &[StoredThumbnailFormat],
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE image_attachments
        SET thumbnail_metadata = $1
        WHERE id = $2
        "#,
    )
    .bind(Json(metadata))
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_image_attachment<'e, E>(executor: E, id: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM image_attachments WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}
