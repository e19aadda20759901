//! Image decoding and PNG encoding for the pipeline
//!
//! Keeps codec details out of the orchestrator so it only deals with
//! decoded buffers and encoded bytes.

use crate::error::{PipelineError, Result};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Service for converting between raw bytes and image buffers
pub struct ImageCodec;

impl ImageCodec {
    /// Decode downloaded bytes as a colour image.
    ///
    /// The format is guessed from the content. Any alpha channel or
    /// greyscale encoding is converted to 8-bit RGB.
    ///
    /// # Errors
    /// - Unrecognised or corrupt image data
    pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
        if bytes.is_empty() {
            return Err(PipelineError::processing("Cannot decode an empty image"));
        }
        let image = image::load_from_memory(bytes)?;
        Ok(image.to_rgb8())
    }

    /// Encode an image as PNG with an alpha channel.
    ///
    /// The image is converted to RGBA8 first, so the output carries alpha
    /// even when the input has none.
    ///
    /// # Errors
    /// - PNG encoder failures
    pub fn encode_png_with_alpha(image: &DynamicImage) -> Result<Vec<u8>> {
        let rgba = match image {
            DynamicImage::ImageRgba8(rgba) => DynamicImage::ImageRgba8(rgba.clone()),
            other => DynamicImage::ImageRgba8(other.to_rgba8()),
        };

        let mut buffer = Cursor::new(Vec::new());
        rgba.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(buffer.into_inner())
    }
}
