//! Face restoration stage
//!
//! Detects faces, aligns each one to a canonical crop, runs the face
//! enhancer, upsamples the whole image and pastes the enhanced faces back
//! with a feathered mask.

pub mod align;
pub mod paste;

use crate::{
    config::RestorationSettings,
    error::Result,
    inference::{BackgroundUpsampler, FaceDetector, FaceEnhancer, ImageRestorer},
    types::FaceDetection,
};
use align::{estimate_similarity, template_for, warp_face, AffineTransform};
use image::{imageops::FilterType, RgbImage};
use tracing::{debug, info, instrument, span, warn, Level};

/// Restores faces in an image and upscales the rest of it
pub struct FaceRestorer {
    detector: Box<dyn FaceDetector>,
    enhancer: Box<dyn FaceEnhancer>,
    upsampler: Box<dyn BackgroundUpsampler>,
    settings: RestorationSettings,
}

impl FaceRestorer {
    /// Create a restorer from its three model capabilities
    ///
    /// # Errors
    /// - Invalid restoration settings
    pub fn new(
        detector: Box<dyn FaceDetector>,
        enhancer: Box<dyn FaceEnhancer>,
        upsampler: Box<dyn BackgroundUpsampler>,
        settings: RestorationSettings,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            detector,
            enhancer,
            upsampler,
            settings,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &RestorationSettings {
        &self.settings
    }

    /// Apply the eye-distance threshold and the centre-face policy
    fn select_faces(&self, faces: Vec<FaceDetection>, width: u32, height: u32) -> Vec<FaceDetection> {
        let threshold = self.settings.eye_dist_threshold;
        let mut kept: Vec<FaceDetection> = faces
            .into_iter()
            .filter(|face| face.eye_distance() >= threshold)
            .collect();

        if self.settings.only_center_face && kept.len() > 1 {
            let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
            let distance = |face: &FaceDetection| {
                let (fx, fy) = face.center();
                (fx - cx).powi(2) + (fy - cy).powi(2)
            };
            kept.sort_by(|a, b| distance(a).total_cmp(&distance(b)));
            kept.truncate(1);
        }
        kept
    }

    /// Run the enhancer on one crop and blend the result with the crop.
    /// A failing enhancer leaves the crop unchanged.
    fn enhance_face(&mut self, crop: &RgbImage) -> RgbImage {
        let enhanced = match self.enhancer.enhance(crop) {
            Ok(enhanced) => enhanced,
            Err(e) => {
                warn!(error = %e, "Face enhancer failed, keeping the unenhanced crop");
                return crop.clone();
            },
        };

        let enhanced = if enhanced.dimensions() == crop.dimensions() {
            enhanced
        } else {
            image::imageops::resize(&enhanced, crop.width(), crop.height(), FilterType::Lanczos3)
        };

        blend(crop, &enhanced, self.settings.blend_weight)
    }

    /// Upsample the whole image to `upscale` times its size
    fn upsample_background(&mut self, image: &RgbImage) -> Result<RgbImage> {
        let upscale = self.settings.upscale;
        let target = (image.width() * upscale, image.height() * upscale);

        let upsampled = if upscale == 1 {
            image.clone()
        } else {
            self.upsampler.upsample(image)?
        };

        if upsampled.dimensions() == target {
            Ok(upsampled)
        } else {
            debug!(
                native_scale = self.upsampler.scale(),
                upscale, "Resizing upsampled background"
            );
            Ok(image::imageops::resize(
                &upsampled,
                target.0,
                target.1,
                FilterType::Lanczos3,
            ))
        }
    }
}

impl ImageRestorer for FaceRestorer {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn restore(&mut self, image: &RgbImage) -> Result<RgbImage> {
        let (width, height) = image.dimensions();

        let faces = {
            let _span = span!(Level::DEBUG, "face_detection").entered();
            let detected = self.detector.detect(image)?;
            let total = detected.len();
            let kept = self.select_faces(detected, width, height);
            debug!(detected = total, kept = kept.len(), "Faces selected");
            kept
        };

        let template = template_for(self.settings.face_size);
        let mut restored: Vec<(RgbImage, AffineTransform)> = Vec::with_capacity(faces.len());
        for face in &faces {
            let _span = span!(Level::DEBUG, "face_enhancement", score = face.score).entered();
            let affine = estimate_similarity(&face.landmarks, &template)?;
            let crop = warp_face(image, &affine, self.settings.face_size)?;
            restored.push((self.enhance_face(&crop), affine));
        }

        let mut output = {
            let _span = span!(Level::DEBUG, "background_upsampling").entered();
            self.upsample_background(image)?
        };

        for (face, affine) in &restored {
            paste::paste_face(&mut output, face, affine, self.settings.upscale)?;
        }

        info!(
            faces = restored.len(),
            output_width = output.width(),
            output_height = output.height(),
            "✨ Restoration complete"
        );
        Ok(output)
    }
}

/// `weight * enhanced + (1 - weight) * original`, per channel
fn blend(original: &RgbImage, enhanced: &RgbImage, weight: f32) -> RgbImage {
    let mut out = original.clone();
    for (dst, src) in out.pixels_mut().zip(enhanced.pixels()) {
        for (d, s) in dst.0.iter_mut().zip(src.0.iter()) {
            let value = weight * f32::from(*s) + (1.0 - weight) * f32::from(*d);
            *d = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
