//! `GFPGAN` face enhancer

use super::{first_image_output, OnnxModel};
use crate::error::Result;
use crate::inference::FaceEnhancer;
use crate::utils::tensor::{to_nchw, Normalization};
use image::{imageops::FilterType, RgbImage};

/// `FaceEnhancer` backed by a `GFPGAN` ONNX graph taking `[-1, 1]` crops
#[derive(Debug)]
pub struct GfpganEnhancer {
    model: OnnxModel,
    face_size: u32,
}

impl GfpganEnhancer {
    #[must_use]
    pub fn new(model: OnnxModel, face_size: u32) -> Self {
        Self { model, face_size }
    }
}

impl FaceEnhancer for GfpganEnhancer {
    fn enhance(&mut self, face: &RgbImage) -> Result<RgbImage> {
        let size = self.face_size;
        let input = if face.dimensions() == (size, size) {
            to_nchw(face, &Normalization::SYMMETRIC)
        } else {
            let resized = image::imageops::resize(face, size, size, FilterType::Triangle);
            to_nchw(&resized, &Normalization::SYMMETRIC)
        };

        let outputs = self.model.run(input)?;
        first_image_output(outputs, &Normalization::SYMMETRIC)
    }
}
