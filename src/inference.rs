//! Capability traits for the neural models and the two image stages
//!
//! Each capability takes one image and returns one result. The restoration
//! and removal logic only sees these traits, so the ONNX implementations in
//! `backends` can be swapped for mocks in tests.

use crate::{
    error::Result,
    types::{FaceDetection, RemovalOutcome},
};
use image::{GrayImage, RgbImage};

/// Face detector producing boxes and five landmarks per face
pub trait FaceDetector: Send {
    /// Detect faces in an RGB image
    ///
    /// # Errors
    /// - Model inference failures
    /// - Tensor conversion errors
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>>;
}

/// Face super-resolution network operating on aligned square crops
pub trait FaceEnhancer: Send {
    /// Enhance an aligned face crop, returning a crop of the same size
    ///
    /// # Errors
    /// Any failure of the network. Callers fall back to the unenhanced crop.
    fn enhance(&mut self, face: &RgbImage) -> Result<RgbImage>;
}

/// Whole-image super-resolution used for the background
pub trait BackgroundUpsampler: Send {
    /// Native magnification of the network
    fn scale(&self) -> u32;

    /// Upsample an RGB image by `scale()`
    ///
    /// # Errors
    /// - Model inference failures
    fn upsample(&mut self, image: &RgbImage) -> Result<RgbImage>;
}

/// Foreground segmentation producing a soft mask
pub trait Segmenter: Send {
    /// Segment an RGB image. The mask has the image's dimensions,
    /// 0 is background and 255 is foreground.
    ///
    /// # Errors
    /// - Model inference failures
    fn segment(&mut self, image: &RgbImage) -> Result<GrayImage>;
}

/// Face restoration stage as consumed by the pipeline
pub trait ImageRestorer: Send {
    /// Restore faces and upscale the whole image
    ///
    /// # Errors
    /// - Detection or upsampling failures
    fn restore(&mut self, image: &RgbImage) -> Result<RgbImage>;
}

/// Background removal stage as consumed by the pipeline
pub trait BackgroundRemoval: Send {
    /// Produce a foreground image with an alpha channel
    ///
    /// # Errors
    /// Failures that are not I/O-class. I/O-class failures yield
    /// `RemovalOutcome::Skipped`.
    fn remove_background(&mut self, image: &RgbImage) -> Result<RemovalOutcome>;
}
