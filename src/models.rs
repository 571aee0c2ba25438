//! Shared data models used across modules

use serde::{Deserialize, Serialize};

use crate::thumbnail::{FormatKey, ThumbnailFormat};

/// An uploaded source image and the thumbnails rendered from it so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub id: i64,
    /// Blob store key of the original upload
    pub path_id: String,
    pub original_width_px: u32,
    pub original_height_px: u32,
    /// 1 for static images
    pub frames: u32,
    pub thumbnail_metadata: Vec<StoredThumbnailFormat>,
}

/// Metadata for one rendered and uploaded thumbnail.
///
/// Stored as one element of the `thumbnail_metadata` JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredThumbnailFormat {
    pub extension: String,
    pub content_type: String,
    pub max_width: u32,
    pub max_height: u32,
    pub animated: bool,
    pub width: u32,
    pub height: u32,
    pub byte_size: usize,
}

impl StoredThumbnailFormat {
    pub fn new(
        format: &ThumbnailFormat,
        content_type: &str,
        width: u32,
        height: u32,
        byte_size: usize,
    ) -> Self {
        StoredThumbnailFormat {
            extension: format.extension.to_string(),
            content_type: content_type.to_string(),
            max_width: format.max_width,
            max_height: format.max_height,
            animated: format.animated,
            width,
            height,
            byte_size,
        }
    }

    /// Key of the catalogue entry this thumbnail was rendered for
    pub fn format_key(&self) -> FormatKey<'_> {
        (self.extension.as_str(), self.max_width, self.max_height, self.animated)
    }
}
