//! `Real-ESRGAN` x4 background upsampler

use super::{first_image_output, OnnxModel};
use crate::error::{PipelineError, Result};
use crate::inference::BackgroundUpsampler;
use crate::utils::tensor::{to_nchw, Normalization};
use image::RgbImage;

const NATIVE_SCALE: u32 = 4;

/// `BackgroundUpsampler` backed by a `Real-ESRGAN` ONNX graph on `[0, 1]` pixels
#[derive(Debug)]
pub struct RealEsrganUpsampler {
    model: OnnxModel,
}

impl RealEsrganUpsampler {
    #[must_use]
    pub fn new(model: OnnxModel) -> Self {
        Self { model }
    }
}

impl BackgroundUpsampler for RealEsrganUpsampler {
    fn scale(&self) -> u32 {
        NATIVE_SCALE
    }

    fn upsample(&mut self, image: &RgbImage) -> Result<RgbImage> {
        let outputs = self.model.run(to_nchw(image, &Normalization::UNIT))?;
        let upsampled = first_image_output(outputs, &Normalization::UNIT)?;

        let expected = (image.width() * NATIVE_SCALE, image.height() * NATIVE_SCALE);
        if upsampled.dimensions() != expected {
            return Err(PipelineError::inference(format!(
                "{} returned {:?}, expected {:?}",
                self.model.name(),
                upsampled.dimensions(),
                expected
            )));
        }
        Ok(upsampled)
    }
}
