//! Error types for the thumbnail pipeline
//!
//! The pipeline only ever recovers from [`ThumbnailError::Image`]: the source
//! bytes could not be decoded, resized or re-encoded. Every other variant
//! propagates out of the run and aborts the surrounding transaction.

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    /// Source image could not be loaded, resized or encoded
    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("blob storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A catalogue entry is unusable (unknown extension, bad encoder options)
    #[error("invalid thumbnail format {format}: {reason}")]
    Config { format: String, reason: String },

    #[error("image attachment {id} is malformed: {reason}")]
    InvalidRecord { id: i64, reason: String },

    #[error("render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ThumbnailError {
    pub fn config(format: impl ToString, reason: impl Into<String>) -> Self {
        ThumbnailError::Config {
            format: format.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is specific to the source data, and so handled by
    /// the delete-or-keep-partial policy instead of aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ThumbnailError::Image(_))
    }
}
