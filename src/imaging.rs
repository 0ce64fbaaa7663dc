//! Image transcoding
//!
//! Static and animated sources are re-encoded to WEBP in process: decode with
//! the `image` crate, resize with `fast_image_resize`, encode through libwebp.
//! No subprocess and no temp files.

use crate::directives::EncodeDirectiveSet;
use crate::geometry::ResolvedGeometry;
use fast_image_resize as fr;
use fr::images::Image as FrImage;
use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, Frame, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;
use tracing::debug;

/// Default libwebp effort (0 fast .. 6 slowest/best)
pub const DEFAULT_WEBP_METHOD: i32 = 6;

/// Used when a source frame carries no delay
const FALLBACK_FRAME_DELAY_MS: u32 = 100;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Resize failed: {0}")]
    Resize(String),

    #[error("Failed to encode WEBP: {0}")]
    Encode(String),
}

impl From<image::ImageError> for ImageError {
    fn from(e: image::ImageError) -> Self {
        ImageError::Decode(e.to_string())
    }
}

/// Source dimensions as read from the container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// In-process image transcoder
pub trait ImageCodec: Send + Sync {
    /// Read dimensions without decoding pixels
    fn dimensions(&self, bytes: &[u8]) -> Result<Dimensions, ImageError>;

    /// Re-encode `bytes` following `directives`, returning the encoded output
    fn encode(&self, bytes: &[u8], directives: &EncodeDirectiveSet) -> Result<Vec<u8>, ImageError>;
}

/// [`ImageCodec`] producing WEBP via libwebp
#[derive(Debug, Clone, Copy)]
pub struct WebpCodec {
    method: i32,
}

impl WebpCodec {
    pub fn new(method: i32) -> Self {
        Self {
            method: method.clamp(0, 6),
        }
    }

    fn config(&self, quality: u8) -> Result<webp::WebPConfig, ImageError> {
        let mut config = webp::WebPConfig::new()
            .map_err(|_| ImageError::Encode("Failed to initialize WebPConfig".to_string()))?;
        config.quality = quality as f32;
        config.method = self.method;
        Ok(config)
    }

    fn encode_static(&self, bytes: &[u8], target: Option<ResolvedGeometry>, quality: u8) -> Result<Vec<u8>, ImageError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        let (out_w, out_h) = target.map(|g| (g.width, g.height)).unwrap_or((width, height));

        let pixels = resize_rgba(rgba.into_raw(), (width, height), (out_w, out_h))?;
        let config = self.config(quality)?;

        let encoder = webp::Encoder::from_rgba(&pixels, out_w, out_h);
        let encoded = encoder
            .encode_advanced(&config)
            .map_err(|e| ImageError::Encode(format!("{:?}", e)))?;

        debug!("Encoded {}x{} WEBP at quality {} ({} bytes)", out_w, out_h, quality, encoded.len());
        Ok(encoded.to_vec())
    }

    fn encode_animated(&self, bytes: &[u8], target: Option<ResolvedGeometry>, quality: u8) -> Result<Vec<u8>, ImageError> {
        let frames = match decode_frames(bytes)? {
            Some(frames) if !frames.is_empty() => frames,
            _ => return self.encode_static(bytes, target, quality),
        };

        let first = frames[0].buffer();
        let (width, height) = first.dimensions();
        let (out_w, out_h) = target.map(|g| (g.width, g.height)).unwrap_or((width, height));

        // Frame buffers must outlive the encoder
        let mut resized = Vec::with_capacity(frames.len());
        let mut timestamps = Vec::with_capacity(frames.len());
        let mut timestamp_ms: i32 = 0;
        for frame in frames {
            timestamps.push(timestamp_ms);
            timestamp_ms = timestamp_ms.saturating_add(frame_delay_ms(&frame) as i32);
            let buffer = frame.into_buffer();
            let dims = buffer.dimensions();
            resized.push(resize_rgba(buffer.into_raw(), dims, (out_w, out_h))?);
        }

        let config = self.config(quality)?;
        let mut encoder = webp::AnimEncoder::new(out_w, out_h, &config);
        encoder.set_loop_count(0);
        for (pixels, ts) in resized.iter().zip(timestamps) {
            encoder.add_frame(webp::AnimFrame::from_rgba(pixels, out_w, out_h, ts));
        }
        let encoded = encoder
            .try_encode()
            .map_err(|e| ImageError::Encode(format!("{:?}", e)))?;

        debug!(
            "Encoded animated {}x{} WEBP, {} frames at quality {} ({} bytes)",
            out_w,
            out_h,
            resized.len(),
            quality,
            encoded.len()
        );
        Ok(encoded.to_vec())
    }
}

impl Default for WebpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_WEBP_METHOD)
    }
}

impl ImageCodec for WebpCodec {
    fn dimensions(&self, bytes: &[u8]) -> Result<Dimensions, ImageError> {
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ImageError::Decode(e.to_string()))?
            .into_dimensions()?;
        Ok(Dimensions { width, height })
    }

    fn encode(&self, bytes: &[u8], directives: &EncodeDirectiveSet) -> Result<Vec<u8>, ImageError> {
        let quality = directives.quality().unwrap_or(100);
        let target = directives.resize();
        if directives.is_animated() {
            self.encode_animated(bytes, target, quality)
        } else {
            self.encode_static(bytes, target, quality)
        }
    }
}

/// Decode every frame of an animated container. `None` for formats that
/// cannot carry animation or a WEBP without it.
fn decode_frames(bytes: &[u8]) -> Result<Option<Vec<Frame>>, ImageError> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Gif) => {
            let decoder = GifDecoder::new(Cursor::new(bytes))?;
            Ok(Some(decoder.into_frames().collect_frames()?))
        }
        Ok(ImageFormat::WebP) => {
            let decoder = WebPDecoder::new(Cursor::new(bytes))?;
            if !decoder.has_animation() {
                return Ok(None);
            }
            Ok(Some(decoder.into_frames().collect_frames()?))
        }
        _ => Ok(None),
    }
}

fn frame_delay_ms(frame: &Frame) -> u32 {
    let (numer, denom) = frame.delay().numer_denom_ms();
    match numer.checked_div(denom) {
        Some(0) | None => FALLBACK_FRAME_DELAY_MS,
        Some(ms) => ms,
    }
}

/// SIMD resize of an RGBA buffer; returns the input untouched when sizes match
fn resize_rgba(pixels: Vec<u8>, from: (u32, u32), to: (u32, u32)) -> Result<Vec<u8>, ImageError> {
    if from == to {
        return Ok(pixels);
    }

    let src_image = FrImage::from_vec_u8(from.0, from.1, pixels, fr::PixelType::U8x4)
        .map_err(|e| ImageError::Resize(format!("Failed to create source image: {:?}", e)))?;
    let mut dst_image = FrImage::new(to.0, to.1, src_image.pixel_type());

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, None)
        .map_err(|e| ImageError::Resize(format!("{:?}", e)))?;

    Ok(dst_image.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::{ComposeInput, DirectiveComposer};
    use crate::request::Quality;
    use image::{Delay, DynamicImage, Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img).write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn gif_bytes(width: u32, height: u32, frames: usize) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut encoder = image::codecs::gif::GifEncoder::new(&mut out);
            for i in 0..frames {
                let shade = (i * 60) as u8;
                let buffer = RgbaImage::from_pixel(width, height, Rgba([shade, 0, 255 - shade, 255]));
                let frame = Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(80, 1));
                encoder.encode_frame(frame).unwrap();
            }
        }
        out
    }

    #[test]
    fn test_dimensions_from_header() {
        let codec = WebpCodec::default();
        let dims = codec.dimensions(&png_bytes(64, 48)).unwrap();
        assert_eq!(dims, Dimensions { width: 64, height: 48 });
    }

    #[test]
    fn test_dimensions_of_garbage_fails() {
        assert!(WebpCodec::default().dimensions(b"not an image").is_err());
    }

    #[test]
    fn test_static_resize_to_webp() {
        let codec = WebpCodec::new(0);
        let directives = DirectiveComposer::default().compose(&ComposeInput::ImageResize {
            geometry: ResolvedGeometry { width: 32, height: 24 },
            quality: Quality::new(80),
        });
        let out = codec.encode(&png_bytes(64, 48), &directives).unwrap();

        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::WebP);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_animated_keeps_frames() {
        let codec = WebpCodec::new(0);
        let directives = DirectiveComposer::default().compose(&ComposeInput::AnimatedResize {
            geometry: ResolvedGeometry { width: 16, height: 16 },
            quality: None,
        });
        let out = codec.encode(&gif_bytes(32, 32, 3), &directives).unwrap();

        let decoder = WebPDecoder::new(Cursor::new(out.as_slice())).unwrap();
        assert!(decoder.has_animation());
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].buffer().dimensions(), (16, 16));
    }

    #[test]
    fn test_animated_flag_on_still_image_encodes_single_frame() {
        let codec = WebpCodec::new(0);
        let directives = DirectiveComposer::default().compose(&ComposeInput::AnimatedResize {
            geometry: ResolvedGeometry { width: 10, height: 10 },
            quality: None,
        });
        let out = codec.encode(&png_bytes(10, 10), &directives).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::WebP);
    }

    #[test]
    fn test_resize_noop_when_same_size() {
        let pixels = vec![1u8; 4 * 4 * 4];
        assert_eq!(resize_rgba(pixels.clone(), (4, 4), (4, 4)).unwrap(), pixels);
    }
}
