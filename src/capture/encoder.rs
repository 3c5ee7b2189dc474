//! Frame downscaling and JPEG encoding.

use crate::error::{Result, SessionError};
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;

/// Fits frames inside a square bound and encodes them as JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoder {
    max_dimension: u32,
    quality: u8,
}

impl FrameEncoder {
    /// Create an encoder. `quality` is clamped to 1–100.
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            quality: quality.clamp(1, 100),
        }
    }

    /// Downscale `frame` to fit within `max_dimension` × `max_dimension`,
    /// preserving aspect ratio, and encode it as JPEG. Frames that already fit
    /// are never upscaled.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Encode`] if JPEG encoding fails.
    pub fn encode(&self, frame: &DynamicImage) -> Result<Vec<u8>> {
        let bound = self.max_dimension;
        let rgb = if frame.width() > bound || frame.height() > bound {
            frame.thumbnail(bound, bound).to_rgb8()
        } else {
            frame.to_rgb8()
        };

        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| SessionError::Encode(format!("jpeg encode failed: {e}")))?;
        Ok(out)
    }
}
