//! `RetinaFace` (`ResNet-50`) face detector
//!
//! The graph takes a full-resolution BGR image minus the Caffe channel means
//! and returns box offsets, class scores and landmark offsets relative to a
//! fixed grid of prior boxes.

use super::OnnxModel;
use crate::error::{PipelineError, Result};
use crate::inference::FaceDetector;
use crate::types::FaceDetection;
use crate::utils::tensor::{to_nchw, Normalization};
use image::RgbImage;
use ndarray::{ArrayD, ArrayView2, Axis};

const MIN_SIZES: [[f32; 2]; 3] = [[16.0, 32.0], [64.0, 128.0], [256.0, 512.0]];
const STEPS: [u32; 3] = [8, 16, 32];
const VARIANCE: [f32; 2] = [0.1, 0.2];
const CONFIDENCE_THRESHOLD: f32 = 0.97;
const NMS_THRESHOLD: f32 = 0.4;

/// Prior box in normalised centre form
#[derive(Debug, Clone, Copy, PartialEq)]
struct Prior {
    cx: f32,
    cy: f32,
    w: f32,
    h: f32,
}

fn priors(width: u32, height: u32) -> Vec<Prior> {
    let (w, h) = (width as f32, height as f32);
    let mut priors = Vec::new();
    for (step, min_sizes) in STEPS.iter().zip(MIN_SIZES.iter()) {
        let rows = height.div_ceil(*step);
        let cols = width.div_ceil(*step);
        let step = *step as f32;
        for i in 0..rows {
            for j in 0..cols {
                for min_size in min_sizes {
                    priors.push(Prior {
                        cx: (j as f32 + 0.5) * step / w,
                        cy: (i as f32 + 0.5) * step / h,
                        w: min_size / w,
                        h: min_size / h,
                    });
                }
            }
        }
    }
    priors
}

/// Find the output whose trailing dimension is `width` and view it as N x width
fn output_with_width<'a>(outputs: &'a [ArrayD<f32>], width: usize) -> Result<ArrayView2<'a, f32>> {
    let output = outputs
        .iter()
        .find(|o| o.shape().last() == Some(&width))
        .ok_or_else(|| {
            PipelineError::inference(format!("Detector has no output with last dimension {width}"))
        })?;

    let mut view = output.view();
    while view.ndim() > 2 {
        view = view.index_axis_move(Axis(0), 0);
    }
    view.into_dimensionality()
        .map_err(|e| PipelineError::inference(format!("Unexpected detector output shape: {e}")))
}

fn face_probability(row: &[f32]) -> f32 {
    let (background, face) = match row {
        [background, face] => (*background, *face),
        _ => return 0.0,
    };
    if (background + face - 1.0).abs() < 1e-3 && (0.0..=1.0).contains(&face) {
        return face;
    }
    // Raw logits
    let max = background.max(face);
    let (eb, ef) = ((background - max).exp(), (face - max).exp());
    ef / (eb + ef)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let union = (a[2] - a[0]) * (a[3] - a[1]) + (b[2] - b[0]) * (b[3] - b[1]) - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn non_max_suppression(mut faces: Vec<FaceDetection>, threshold: f32) -> Vec<FaceDetection> {
    faces.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<FaceDetection> = Vec::new();
    for face in faces {
        if kept.iter().all(|k| iou(&k.bbox, &face.bbox) <= threshold) {
            kept.push(face);
        }
    }
    kept
}

/// Decode raw detector outputs for an image of `width` x `height`.
///
/// Outputs are recognised by their trailing dimension: 4 for boxes, 2 for
/// scores and 10 for landmarks.
///
/// # Errors
/// - Missing outputs or a prior count that does not match the image size
pub fn decode_detections(
    outputs: &[ArrayD<f32>],
    width: u32,
    height: u32,
) -> Result<Vec<FaceDetection>> {
    let loc = output_with_width(outputs, 4)?;
    let conf = output_with_width(outputs, 2)?;
    let landms = output_with_width(outputs, 10)?;
    let priors = priors(width, height);

    let count = priors.len();
    if loc.nrows() != count || conf.nrows() != count || landms.nrows() != count {
        return Err(PipelineError::inference(format!(
            "Detector produced {}/{}/{} rows for {} priors",
            loc.nrows(),
            conf.nrows(),
            landms.nrows(),
            count
        )));
    }

    let (w, h) = (width as f32, height as f32);
    let mut faces = Vec::new();
    for (index, prior) in priors.iter().enumerate() {
        let score = face_probability(&conf.row(index).to_vec());
        if score <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let l = loc.row(index);
        let cx = prior.cx + l[0] * VARIANCE[0] * prior.w;
        let cy = prior.cy + l[1] * VARIANCE[0] * prior.h;
        let bw = prior.w * (l[2] * VARIANCE[1]).exp();
        let bh = prior.h * (l[3] * VARIANCE[1]).exp();
        let bbox = [
            (cx - bw / 2.0) * w,
            (cy - bh / 2.0) * h,
            (cx + bw / 2.0) * w,
            (cy + bh / 2.0) * h,
        ];

        let lm = landms.row(index);
        let mut landmarks = [[0.0f32; 2]; 5];
        for (k, point) in landmarks.iter_mut().enumerate() {
            point[0] = (prior.cx + lm[2 * k] * VARIANCE[0] * prior.w) * w;
            point[1] = (prior.cy + lm[2 * k + 1] * VARIANCE[0] * prior.h) * h;
        }

        faces.push(FaceDetection {
            bbox,
            score,
            landmarks,
        });
    }

    Ok(non_max_suppression(faces, NMS_THRESHOLD))
}

/// `FaceDetector` backed by a `RetinaFace` ONNX graph
#[derive(Debug)]
pub struct RetinaFaceDetector {
    model: OnnxModel,
}

impl RetinaFaceDetector {
    #[must_use]
    pub fn new(model: OnnxModel) -> Self {
        Self { model }
    }
}

impl FaceDetector for RetinaFaceDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceDetection>> {
        let (width, height) = image.dimensions();
        let outputs = self.model.run(to_nchw(image, &Normalization::CAFFE_BGR))?;
        let faces = decode_detections(&outputs, width, height)?;
        log::debug!("Detected {} face(s) in {}x{}", faces.len(), width, height);
        Ok(faces)
    }
}
