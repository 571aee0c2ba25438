//! Thumbnail catalogue and format resolution
//!
//! Every uploaded image is rendered into each entry of [`THUMBNAIL_FORMATS`].
//! [`missing_thumbnails`] works out which entries an attachment still lacks,
//! and [`pipeline::ThumbnailPipeline`] renders and uploads them.

pub mod pipeline;
pub mod resize;

use std::collections::HashSet;
use std::fmt;

use crate::error::ThumbnailError;
use crate::models::{ImageAttachment, StoredThumbnailFormat};
use crate::storage::content_type_for;

const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_WEBP_QUALITY: u8 = 75;
const DEFAULT_GIF_SPEED: i32 = 10;

/// One entry of the thumbnail catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThumbnailFormat {
    pub extension: &'static str,
    pub max_width: u32,
    pub max_height: u32,
    /// Keep every frame of an animated source
    pub animated: bool,
    /// Encoder options, comma separated `key=value` pairs
    pub opts: &'static str,
}

impl ThumbnailFormat {
    pub const fn new(
        extension: &'static str,
        max_width: u32,
        max_height: u32,
        animated: bool,
        opts: &'static str,
    ) -> Self {
        ThumbnailFormat {
            extension,
            max_width,
            max_height,
            animated,
            opts,
        }
    }

    /// The identity of a format: a stored thumbnail satisfies this entry
    /// when its key is equal.
    pub fn format_key(&self) -> FormatKey<'static> {
        (self.extension, self.max_width, self.max_height, self.animated)
    }
}

/// `(extension, max_width, max_height, animated)`
pub type FormatKey<'a> = (&'a str, u32, u32, bool);

impl fmt::Display for ThumbnailFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let anim = if self.animated { "-anim" } else { "" };
        write!(
            f,
            "{}x{}{}.{}",
            self.max_width, self.max_height, anim, self.extension
        )
    }
}

/// Formats rendered for every image attachment, in processing order.
pub const THUMBNAIL_FORMATS: &[ThumbnailFormat] = &[
    ThumbnailFormat::new("webp", 840, 560, true, ""),
    ThumbnailFormat::new("webp", 840, 560, false, ""),
    ThumbnailFormat::new("jpg", 300, 200, false, "Q=80"),
];

/// Catalogue entries with no stored thumbnail yet, in catalogue order.
pub fn missing_thumbnails(
    attachment: &ImageAttachment,
    catalogue: &[ThumbnailFormat],
) -> Vec<ThumbnailFormat> {
    let stored: HashSet<FormatKey<'_>> = attachment
        .thumbnail_metadata
        .iter()
        .map(StoredThumbnailFormat::format_key)
        .collect();
    catalogue
        .iter()
        .filter(|format| !stored.contains(&format.format_key()))
        .copied()
        .collect()
}

/// Storage key for one thumbnail of an attachment. Stable across runs.
pub fn thumbnail_path(attachment: &ImageAttachment, format: &ThumbnailFormat) -> String {
    format!("thumbnail/{}/{}", attachment.path_id, format)
}

/// Encoder selected by a catalogue entry's extension and options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEncoding {
    Gif { speed: i32 },
    Jpeg { quality: u8 },
    Png,
    WebP { quality: u8 },
}

impl OutputEncoding {
    pub fn for_format(format: &ThumbnailFormat) -> Result<Self, ThumbnailError> {
        let mut encoding = match format.extension {
            "gif" => OutputEncoding::Gif {
                speed: DEFAULT_GIF_SPEED,
            },
            "jpg" | "jpeg" => OutputEncoding::Jpeg {
                quality: DEFAULT_JPEG_QUALITY,
            },
            "png" => OutputEncoding::Png,
            "webp" => OutputEncoding::WebP {
                quality: DEFAULT_WEBP_QUALITY,
            },
            other => {
                return Err(ThumbnailError::config(
                    format,
                    format!("no encoder for extension {:?}", other),
                ));
            }
        };

        if format.animated && !encoding.supports_animation() {
            return Err(ThumbnailError::config(
                format,
                "animated output requires an animation-capable container",
            ));
        }

        for opt in format.opts.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            let (key, value) = opt
                .split_once('=')
                .ok_or_else(|| ThumbnailError::config(format, format!("malformed option {:?}", opt)))?;
            match (&mut encoding, key) {
                (OutputEncoding::Jpeg { quality } | OutputEncoding::WebP { quality }, "Q") => {
                    *quality = value
                        .parse()
                        .ok()
                        .filter(|q| (1..=100).contains(q))
                        .ok_or_else(|| {
                            ThumbnailError::config(format, format!("bad quality {:?}", value))
                        })?;
                }
                (OutputEncoding::Gif { speed }, "speed") => {
                    *speed = value
                        .parse()
                        .ok()
                        .filter(|s| (1..=30).contains(s))
                        .ok_or_else(|| {
                            ThumbnailError::config(format, format!("bad speed {:?}", value))
                        })?;
                }
                _ => {
                    return Err(ThumbnailError::config(
                        format,
                        format!("unsupported option {:?}", key),
                    ));
                }
            }
        }

        Ok(encoding)
    }

    pub fn supports_animation(&self) -> bool {
        matches!(self, OutputEncoding::Gif { .. } | OutputEncoding::WebP { .. })
    }
}

/// Check the catalogue once at startup, so a bad entry fails fast instead of
/// surfacing as a failed job for every attachment.
pub fn validate_catalogue(catalogue: &[ThumbnailFormat]) -> Result<(), ThumbnailError> {
    let mut seen = HashSet::new();
    for format in catalogue {
        if format.max_width == 0 || format.max_height == 0 {
            return Err(ThumbnailError::config(format, "dimensions must be positive"));
        }
        if !seen.insert(format.format_key()) {
            return Err(ThumbnailError::config(format, "duplicate catalogue entry"));
        }
        if content_type_for(format.extension).is_none() {
            return Err(ThumbnailError::config(format, "unknown content type"));
        }
        OutputEncoding::for_format(format)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(stored: &[ThumbnailFormat]) -> ImageAttachment {
        ImageAttachment {
            id: 1,
            path_id: "2/ab/photo.png".into(),
            original_width_px: 1000,
            original_height_px: 800,
            frames: 1,
            thumbnail_metadata: stored
                .iter()
                .map(|f| StoredThumbnailFormat::new(f, "image/x", 10, 10, 10))
                .collect(),
        }
    }

    #[test]
    fn test_default_catalogue_is_valid() {
        validate_catalogue(THUMBNAIL_FORMATS).unwrap();
    }

    #[test]
    fn test_missing_follows_catalogue_order() {
        let catalogue = THUMBNAIL_FORMATS;
        assert_eq!(missing_thumbnails(&attachment(&[]), catalogue), catalogue.to_vec());

        let partial = attachment(&[catalogue[1]]);
        assert_eq!(
            missing_thumbnails(&partial, catalogue),
            vec![catalogue[0], catalogue[2]]
        );

        let reversed: Vec<_> = catalogue.iter().rev().copied().collect();
        assert!(missing_thumbnails(&attachment(&reversed), catalogue).is_empty());
    }

    #[test]
    fn test_missing_includes_animated_formats_for_static_sources() {
        let catalogue = [
            ThumbnailFormat::new("jpg", 100, 100, false, ""),
            ThumbnailFormat::new("gif", 100, 100, true, ""),
        ];
        let mut still = attachment(&[]);
        still.frames = 1;
        assert_eq!(missing_thumbnails(&still, &catalogue), catalogue.to_vec());
    }

    #[test]
    fn test_missing_ignores_entries_outside_catalogue() {
        let retired = ThumbnailFormat::new("png", 64, 64, false, "");
        let catalogue = [ThumbnailFormat::new("png", 128, 128, false, "")];
        assert_eq!(
            missing_thumbnails(&attachment(&[retired]), &catalogue),
            catalogue.to_vec()
        );
    }

    #[test]
    fn test_thumbnail_path_generation() {
        let a = attachment(&[]);
        assert_eq!(
            thumbnail_path(&a, &ThumbnailFormat::new("webp", 840, 560, true, "")),
            "thumbnail/2/ab/photo.png/840x560-anim.webp"
        );
        assert_eq!(
            thumbnail_path(&a, &ThumbnailFormat::new("webp", 840, 560, false, "")),
            "thumbnail/2/ab/photo.png/840x560.webp"
        );
    }

    #[test]
    fn test_output_encoding_options() {
        assert_eq!(
            OutputEncoding::for_format(&ThumbnailFormat::new("jpg", 1, 1, false, "Q=55")).unwrap(),
            OutputEncoding::Jpeg { quality: 55 }
        );
        assert_eq!(
            OutputEncoding::for_format(&ThumbnailFormat::new("gif", 1, 1, true, "")).unwrap(),
            OutputEncoding::Gif {
                speed: DEFAULT_GIF_SPEED
            }
        );
        assert_eq!(
            OutputEncoding::for_format(&ThumbnailFormat::new("png", 1, 1, false, " ")).unwrap(),
            OutputEncoding::Png
        );
        assert_eq!(
            OutputEncoding::for_format(&ThumbnailFormat::new("webp", 1, 1, true, "")).unwrap(),
            OutputEncoding::WebP {
                quality: DEFAULT_WEBP_QUALITY
            }
        );
        assert_eq!(
            OutputEncoding::for_format(&ThumbnailFormat::new("webp", 1, 1, false, "Q=60")).unwrap(),
            OutputEncoding::WebP { quality: 60 }
        );
    }

    #[test]
    fn test_output_encoding_rejects_bad_entries() {
        let bad = [
            ThumbnailFormat::new("bmp", 1, 1, false, ""),
            ThumbnailFormat::new("jpg", 1, 1, true, ""),
            ThumbnailFormat::new("png", 1, 1, true, ""),
            ThumbnailFormat::new("webp", 1, 1, false, "Q=101"),
            ThumbnailFormat::new("jpg", 1, 1, false, "Q=0"),
            ThumbnailFormat::new("jpg", 1, 1, false, "Q"),
            ThumbnailFormat::new("png", 1, 1, false, "Q=80"),
        ];
        for format in bad {
            assert!(
                matches!(
                    OutputEncoding::for_format(&format),
                    Err(ThumbnailError::Config { .. })
                ),
                "{format} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_catalogue_rejects_duplicates_and_zero_sizes() {
        let dup = [
            ThumbnailFormat::new("jpg", 10, 10, false, "Q=80"),
            ThumbnailFormat::new("jpg", 10, 10, false, "Q=60"),
        ];
        assert!(validate_catalogue(&dup).is_err());
        assert!(validate_catalogue(&[ThumbnailFormat::new("jpg", 0, 10, false, "")]).is_err());
    }
}
