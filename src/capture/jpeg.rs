//! Bundled JPEG encoder backed by the `image` crate

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};

use super::{CaptureError, FrameEncoder, RawFrame};

/// Default frame encoder producing baseline JPEG
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegCompressor;

impl JpegCompressor {
    pub fn new() -> Self {
        Self
    }
}

impl FrameEncoder for JpegCompressor {
    fn compress(&mut self, frame: &RawFrame, quality: u8) -> Result<Vec<u8>, CaptureError> {
        let expected = RawFrame::expected_len(frame.width, frame.height);
        if frame.pixels.len() != expected {
            return Err(CaptureError::BadFrame {
                width: frame.width,
                height: frame.height,
                expected,
                actual: frame.pixels.len(),
            });
        }

        let quality = quality.clamp(1, 100);
        let mut out = Cursor::new(Vec::new());

        JpegEncoder::new_with_quality(&mut out, quality)
            .write_image(
                &frame.pixels,
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| CaptureError::Encode(e.to_string()))?;

        Ok(out.into_inner())
    }
}
