//! Decoding, fit-within resizing and encoding of a single thumbnail.
//!
//! Everything here is synchronous and CPU bound; the pipeline runs it on the
//! blocking thread pool.
//!
//! Decoding is capped at [`MAX_DECODE_BYTES`]. Animated sources are resized
//! one frame at a time as they are decoded, and the resized frames share the
//! same cap, so a hostile source fails with [`ImageError::Limits`] instead of
//! exhausting memory.

use std::io::Cursor;
use std::iter;

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{PngDecoder, PngEncoder};
use image::codecs::webp::WebPDecoder;
use image::error::{
    DecodingError, EncodingError, ImageFormatHint, LimitError, LimitErrorKind,
};
use image::imageops::{self, FilterType};
use image::{
    AnimationDecoder, DynamicImage, Frame, Frames, ImageDecoder, ImageError, ImageFormat,
    ImageReader, ImageResult, Limits,
};
use webp_animation::{EncoderOptions, EncodingConfig, EncodingType, LossyEncodingConfig};

use super::OutputEncoding;

/// Allocation cap for a decoded canvas and for the resized frames of one
/// render. Same as the `image` crate's default decoder limit.
pub const MAX_DECODE_BYTES: u64 = 512 * 1024 * 1024;

/// Which frames of the source to load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLoad {
    /// Source is static; load its only frame
    Default,
    All,
    First,
}

impl FrameLoad {
    pub fn for_format(frames: u32, animated: bool) -> Self {
        if frames <= 1 {
            FrameLoad::Default
        } else if animated {
            FrameLoad::All
        } else {
            FrameLoad::First
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub load: FrameLoad,
    pub max_width: u32,
    pub max_height: u32,
    pub encoding: OutputEncoding,
}

#[derive(Debug, Clone)]
pub struct RenderedThumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    /// Height of a single frame
    pub height: u32,
    pub frame_count: u32,
}

/// Renders one thumbnail from the full original bytes.
pub type RenderFn = fn(&[u8], &RenderRequest) -> ImageResult<RenderedThumbnail>;

/// Scale `(width, height)` down to fit within the box, keeping aspect ratio.
/// Sources already inside the box keep their size.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let fit = |side: u32, max: u32| ((side as f64 * scale).round() as u32).clamp(1, max);
    (fit(width, max_width), fit(height, max_height))
}

pub fn render(source: &[u8], request: &RenderRequest) -> ImageResult<RenderedThumbnail> {
    let mut decoded = load_frames(source, request.load)?;
    let first = decoded.next().ok_or_else(no_frames)??;

    let (src_width, src_height) = first.buffer().dimensions();
    let (width, height) = fit_within(src_width, src_height, request.max_width, request.max_height);
    let frame_bytes = rgba_bytes(width, height);

    let mut frames = Vec::new();
    for frame in iter::once(Ok(first)).chain(decoded) {
        let frame = frame?;
        let total = frame_bytes.saturating_mul(frames.len() as u64 + 1);
        if total > MAX_DECODE_BYTES {
            return Err(insufficient_memory());
        }
        frames.push(resize_frame(frame, width, height));
    }
    let frame_count = u32::try_from(frames.len()).map_err(|_| insufficient_memory())?;

    let bytes = encode(frames, request.encoding)?;
    Ok(RenderedThumbnail {
        bytes,
        width,
        height,
        frame_count,
    })
}

fn resize_frame(frame: Frame, width: u32, height: u32) -> Frame {
    if frame.buffer().dimensions() == (width, height) {
        return frame;
    }
    let delay = frame.delay();
    let resized = imageops::resize(frame.buffer(), width, height, FilterType::Lanczos3);
    Frame::from_parts(resized, 0, 0, delay)
}

/// Decoded frames of `source`, produced lazily so each can be resized before
/// the next one is decoded.
fn load_frames(source: &[u8], load: FrameLoad) -> ImageResult<Frames<'_>> {
    let reader = ImageReader::new(Cursor::new(source)).with_guessed_format()?;

    if load == FrameLoad::All {
        match reader.format() {
            Some(ImageFormat::Gif) => {
                let decoder = limited(GifDecoder::new(Cursor::new(source))?)?;
                return Ok(decoder.into_frames());
            }
            Some(ImageFormat::Png) => {
                let decoder = limited(PngDecoder::new(Cursor::new(source))?)?;
                if decoder.is_apng()? {
                    return Ok(decoder.apng()?.into_frames());
                }
            }
            Some(ImageFormat::WebP) => {
                let decoder = limited(WebPDecoder::new(Cursor::new(source))?)?;
                if decoder.has_animation() {
                    return Ok(decoder.into_frames());
                }
            }
            _ => {}
        }
    }

    // The still decoders only ever produce the first frame.
    let image = reader.decode()?;
    let frame = Frame::new(image.into_rgba8());
    Ok(Frames::new(Box::new(iter::once(Ok(frame)))))
}

/// Reject canvases over the decode cap before any frame is allocated, and
/// apply the default limits to the decoder itself.
fn limited<D: ImageDecoder>(mut decoder: D) -> ImageResult<D> {
    let (width, height) = decoder.dimensions();
    if rgba_bytes(width, height) > MAX_DECODE_BYTES {
        return Err(insufficient_memory());
    }
    decoder.set_limits(Limits::default())?;
    Ok(decoder)
}

fn rgba_bytes(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * 4
}

fn encode(frames: Vec<Frame>, encoding: OutputEncoding) -> ImageResult<Vec<u8>> {
    let mut bytes = Vec::new();
    match encoding {
        OutputEncoding::Gif { speed } => {
            let mut encoder = GifEncoder::new_with_speed(&mut bytes, speed);
            encoder.set_repeat(Repeat::Infinite)?;
            encoder.encode_frames(frames)?;
        }
        OutputEncoding::Jpeg { quality } => {
            let image = DynamicImage::ImageRgb8(still_image(frames)?.to_rgb8());
            image.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))?;
        }
        OutputEncoding::Png => {
            still_image(frames)?.write_with_encoder(PngEncoder::new(&mut bytes))?;
        }
        OutputEncoding::WebP { quality } => {
            bytes = encode_webp(&frames, quality)?;
        }
    }
    Ok(bytes)
}

/// Lossy WebP. Several frames make an animation; libwebp writes a single
/// frame as a still image.
fn encode_webp(frames: &[Frame], quality: u8) -> ImageResult<Vec<u8>> {
    let first = frames.first().ok_or_else(no_frames)?;
    let options = EncoderOptions {
        encoding_config: Some(EncodingConfig {
            encoding_type: EncodingType::Lossy(LossyEncodingConfig::default()),
            quality: quality as f32,
            method: 4,
        }),
        ..EncoderOptions::default()
    };
    let mut encoder =
        webp_animation::Encoder::new_with_options(first.buffer().dimensions(), options)
            .map_err(webp_error)?;

    // Timestamps must strictly increase.
    let mut timestamp: i32 = 0;
    for frame in frames {
        encoder
            .add_frame(frame.buffer().as_raw(), timestamp)
            .map_err(webp_error)?;
        let (numer, denom) = frame.delay().numer_denom_ms();
        let delay = i32::try_from(numer / denom.max(1)).unwrap_or(i32::MAX).max(1);
        timestamp = timestamp.saturating_add(delay);
    }
    let data = encoder.finalize(timestamp).map_err(webp_error)?;
    Ok(data.to_vec())
}

fn webp_error(e: webp_animation::Error) -> ImageError {
    ImageError::Encoding(EncodingError::new(
        ImageFormatHint::Exact(ImageFormat::WebP),
        format!("{:?}", e),
    ))
}

fn still_image(frames: Vec<Frame>) -> ImageResult<DynamicImage> {
    frames
        .into_iter()
        .next()
        .map(|frame| DynamicImage::ImageRgba8(frame.into_buffer()))
        .ok_or_else(no_frames)
}

fn no_frames() -> ImageError {
    ImageError::Decoding(DecodingError::new(
        ImageFormatHint::Unknown,
        "source contains no frames",
    ))
}

fn insufficient_memory() -> ImageError {
    ImageError::Limits(LimitError::from_kind(LimitErrorKind::InsufficientMemory))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use image::{Delay, Rgba, RgbaImage};

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    pub fn animated_gif(width: u32, height: u32, frames: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.set_repeat(Repeat::Infinite).unwrap();
            let frames = (0..frames).map(|i| {
                let shade = (i * 40 % 256) as u8;
                let buffer = RgbaImage::from_pixel(width, height, Rgba([shade, 0, 255 - shade, 255]));
                Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(100, 1))
            });
            encoder.encode_frames(frames).unwrap();
        }
        bytes
    }

    /// A 35 byte GIF: one 1x1 frame on a `side` x `side` logical screen.
    pub fn huge_canvas_gif(side: u16) -> Vec<u8> {
        let [lo, hi] = side.to_le_bytes();
        let mut bytes = b"GIF89a".to_vec();
        bytes.extend_from_slice(&[lo, hi, lo, hi, 0x00, 0x00, 0x00]);
        // Image descriptor with a two entry local color table.
        bytes.extend_from_slice(&[0x2c, 0, 0, 0, 0, 1, 0, 1, 0, 0x80]);
        bytes.extend_from_slice(&[0, 0, 0, 0xff, 0xff, 0xff]);
        // LZW data: clear, index 0, end of information.
        bytes.extend_from_slice(&[0x02, 0x02, 0x44, 0x01, 0x00]);
        bytes.push(0x3b);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{animated_gif, huge_canvas_gif, png};
    use super::*;

    fn request(load: FrameLoad, max: (u32, u32), encoding: OutputEncoding) -> RenderRequest {
        RenderRequest {
            load,
            max_width: max.0,
            max_height: max.1,
            encoding,
        }
    }

    #[test]
    fn test_frame_load_mode() {
        assert_eq!(FrameLoad::for_format(1, true), FrameLoad::Default);
        assert_eq!(FrameLoad::for_format(1, false), FrameLoad::Default);
        assert_eq!(FrameLoad::for_format(5, true), FrameLoad::All);
        assert_eq!(FrameLoad::for_format(5, false), FrameLoad::First);
    }

    #[test]
    fn test_fit_within_never_upscales() {
        assert_eq!(fit_within(50, 40, 100, 100), (50, 40));
        assert_eq!(fit_within(100, 100, 100, 100), (100, 100));
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        assert_eq!(fit_within(50, 200, 100, 100), (25, 100));
        assert_eq!(fit_within(400, 100, 100, 100), (100, 25));
        assert_eq!(fit_within(1680, 1120, 840, 560), (840, 560));
        assert_eq!(fit_within(10_000, 1, 100, 100), (100, 1));
    }

    #[test]
    fn test_render_static_jpeg() {
        let out = render(
            &png(50, 200),
            &request(FrameLoad::Default, (100, 100), OutputEncoding::Jpeg { quality: 80 }),
        )
        .unwrap();
        assert_eq!((out.width, out.height, out.frame_count), (25, 100, 1));

        let decoded = image::load_from_memory_with_format(&out.bytes, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (25, 100));
    }

    #[test]
    fn test_render_small_source_keeps_size() {
        let out = render(
            &png(30, 20),
            &request(FrameLoad::Default, (840, 560), OutputEncoding::WebP { quality: 75 }),
        )
        .unwrap();
        assert_eq!((out.width, out.height), (30, 20));
        let decoded = image::load_from_memory_with_format(&out.bytes, ImageFormat::WebP).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 20));
    }

    #[test]
    fn test_render_all_frames_of_animation() {
        let out = render(
            &animated_gif(40, 20, 5),
            &request(FrameLoad::All, (20, 20), OutputEncoding::Gif { speed: 10 }),
        )
        .unwrap();
        assert_eq!((out.width, out.height, out.frame_count), (20, 10, 5));

        let frames = GifDecoder::new(Cursor::new(&out.bytes))
            .unwrap()
            .into_frames()
            .collect_frames()
            .unwrap();
        assert_eq!(frames.len(), 5);
    }

    #[test]
    fn test_render_animated_webp() {
        let out = render(
            &animated_gif(40, 20, 5),
            &request(FrameLoad::All, (20, 20), OutputEncoding::WebP { quality: 75 }),
        )
        .unwrap();
        assert_eq!((out.width, out.height, out.frame_count), (20, 10, 5));

        let decoder = WebPDecoder::new(Cursor::new(&out.bytes)).unwrap();
        assert!(decoder.has_animation());
        assert_eq!(decoder.dimensions(), (20, 10));
        assert_eq!(decoder.into_frames().collect_frames().unwrap().len(), 5);
    }

    #[test]
    fn test_lossy_webp_is_smaller_than_lossless() {
        let noise = image::RgbaImage::from_fn(400, 400, |x, y| {
            let v = (x.wrapping_mul(7919) ^ y.wrapping_mul(104_729) ^ (x * y)) as u8;
            image::Rgba([v, v.rotate_left(3), v.rotate_left(5), 255])
        });
        let mut source = Vec::new();
        DynamicImage::ImageRgba8(noise)
            .write_to(&mut Cursor::new(&mut source), ImageFormat::Png)
            .unwrap();
        let lossy = render(
            &source,
            &request(FrameLoad::Default, (400, 400), OutputEncoding::WebP { quality: 75 }),
        )
        .unwrap();

        let mut lossless = Vec::new();
        image::load_from_memory(&source)
            .unwrap()
            .write_with_encoder(image::codecs::webp::WebPEncoder::new_lossless(&mut lossless))
            .unwrap();
        assert!(lossy.bytes.len() < lossless.len());
    }

    #[test]
    fn test_huge_canvas_is_rejected_before_allocation() {
        let source = huge_canvas_gif(12_000);
        for load in [FrameLoad::All, FrameLoad::Default] {
            let err = render(
                &source,
                &request(load, (100, 100), OutputEncoding::Gif { speed: 10 }),
            )
            .unwrap_err();
            assert!(matches!(err, ImageError::Limits(_)), "{load:?}: {err}");
        }
    }

    #[test]
    fn test_canvas_within_limit_still_renders() {
        let out = render(
            &huge_canvas_gif(2_000),
            &request(FrameLoad::All, (100, 100), OutputEncoding::Gif { speed: 10 }),
        )
        .unwrap();
        assert_eq!((out.width, out.height, out.frame_count), (100, 100, 1));
    }

    #[test]
    fn test_render_first_frame_of_animation() {
        let out = render(
            &animated_gif(40, 20, 5),
            &request(FrameLoad::First, (20, 20), OutputEncoding::Png),
        )
        .unwrap();
        assert_eq!((out.width, out.height, out.frame_count), (20, 10, 1));
    }

    #[test]
    fn test_render_all_frames_of_still_source() {
        let out = render(
            &png(10, 10),
            &request(FrameLoad::All, (5, 5), OutputEncoding::Gif { speed: 10 }),
        )
        .unwrap();
        assert_eq!(out.frame_count, 1);
    }

    #[test]
    fn test_render_rejects_corrupt_source() {
        let err = render(
            b"definitely not an image",
            &request(FrameLoad::Default, (10, 10), OutputEncoding::Png),
        )
        .unwrap_err();
        assert!(matches!(err, ImageError::Unsupported(_) | ImageError::Decoding(_)));

        let mut truncated = png(64, 64);
        truncated.truncate(60);
        assert!(render(&truncated, &request(FrameLoad::Default, (10, 10), OutputEncoding::Png)).is_err());
    }
}
