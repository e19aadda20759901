//! `U2-Net` salient object segmenter

use super::OnnxModel;
use crate::error::{PipelineError, Result};
use crate::inference::Segmenter;
use crate::utils::tensor::{to_nchw, Letterbox, Normalization};
use image::{GrayImage, RgbImage};
use ndarray::{ArrayView2, Axis};

const INPUT_SIZE: u32 = 320;

/// `Segmenter` backed by a `U2-Net` ONNX graph.
///
/// The first output is the fused saliency map; the side outputs are ignored.
#[derive(Debug)]
pub struct U2NetSegmenter {
    model: OnnxModel,
}

impl U2NetSegmenter {
    #[must_use]
    pub fn new(model: OnnxModel) -> Self {
        Self { model }
    }
}

impl Segmenter for U2NetSegmenter {
    fn segment(&mut self, image: &RgbImage) -> Result<GrayImage> {
        let letterbox = Letterbox::fit(image, INPUT_SIZE, [0, 0, 0])?;
        let outputs = self
            .model
            .run(to_nchw(&letterbox.canvas, &Normalization::IMAGENET))?;

        let saliency = outputs
            .first()
            .ok_or_else(|| PipelineError::inference("Segmenter produced no outputs"))?;
        let mut view = saliency.view();
        while view.ndim() > 2 {
            view = view.index_axis_move(Axis(0), 0);
        }
        let prediction: ArrayView2<'_, f32> = view.into_dimensionality().map_err(|e| {
            PipelineError::inference(format!("Unexpected segmenter output shape: {e}"))
        })?;

        Ok(letterbox.unfit_mask(prediction, image.width(), image.height()))
    }
}
