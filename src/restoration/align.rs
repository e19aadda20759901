//! Face alignment: similarity estimation and affine warping

use crate::error::{PipelineError, Result};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

/// Canonical landmark positions inside a 512x512 face crop
pub const FACE_TEMPLATE_512: [[f32; 2]; 5] = [
    [192.981_38, 239.947_08],
    [318.902_77, 240.193_6],
    [256.634_16, 314.019_35],
    [201.261_17, 371.410_43],
    [313.089_05, 371.151_18],
];

/// Fill colour for crop pixels outside the source image
pub const BORDER_COLOR: Rgb<u8> = Rgb([135, 133, 132]);

/// 2x3 affine matrix mapping `(x, y)` to `(a*x + b*y + c, d*x + e*y + f)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub matrix: [[f32; 3]; 2],
}

impl AffineTransform {
    pub const IDENTITY: Self = Self {
        matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    #[must_use]
    pub fn new(matrix: [[f32; 3]; 2]) -> Self {
        Self { matrix }
    }

    /// Map a point through the transform
    #[must_use]
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        let [[a, b, c], [d, e, f]] = self.matrix;
        (a * x + b * y + c, d * x + e * y + f)
    }

    /// Inverse transform, `None` when the linear part is singular
    #[must_use]
    pub fn invert(&self) -> Option<Self> {
        let [[a, b, c], [d, e, f]] = self.matrix;
        let det = a * e - b * d;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let ia = e / det;
        let ib = -b / det;
        let id = -d / det;
        let ie = a / det;
        Some(Self::new([
            [ia, ib, -(ia * c + ib * f)],
            [id, ie, -(id * c + ie * f)],
        ]))
    }

    /// Multiply every coefficient (linear part and translation) by `factor`
    #[must_use]
    pub fn scaled(&self, factor: f32) -> Self {
        let mut matrix = self.matrix;
        for row in &mut matrix {
            for value in row.iter_mut() {
                *value *= factor;
            }
        }
        Self::new(matrix)
    }

    #[must_use]
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        let mut matrix = self.matrix;
        matrix[0][2] += dx;
        matrix[1][2] += dy;
        Self::new(matrix)
    }

    pub(crate) fn to_projection(self) -> Result<Projection> {
        let [[a, b, c], [d, e, f]] = self.matrix;
        Projection::from_matrix([a, b, c, d, e, f, 0.0, 0.0, 1.0])
            .ok_or_else(|| PipelineError::processing("Affine transform is not invertible"))
    }
}

/// Landmark template scaled to a crop of `face_size` pixels
#[must_use]
pub fn template_for(face_size: u32) -> [[f32; 2]; 5] {
    let factor = face_size as f32 / 512.0;
    FACE_TEMPLATE_512.map(|[x, y]| [x * factor, y * factor])
}

/// Least-squares similarity transform (rotation, uniform scale,
/// translation) taking `src` landmarks onto `dst`
pub fn estimate_similarity(src: &[[f32; 2]; 5], dst: &[[f32; 2]; 5]) -> Result<AffineTransform> {
    let n = src.len() as f32;
    let mean = |points: &[[f32; 2]; 5]| {
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(ax, ay), [x, y]| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (msx, msy) = mean(src);
    let (mdx, mdy) = mean(dst);

    let mut norm = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for ([sx, sy], [dx, dy]) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - msx, sy - msy);
        let (dx, dy) = (dx - mdx, dy - mdy);
        norm += sx * sx + sy * sy;
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
    }

    if norm < f32::EPSILON {
        return Err(PipelineError::processing(
            "Degenerate landmarks: all points coincide",
        ));
    }

    let a = dot / norm;
    let b = cross / norm;
    let tx = mdx - (a * msx - b * msy);
    let ty = mdy - (b * msx + a * msy);

    Ok(AffineTransform::new([[a, -b, tx], [b, a, ty]]))
}

/// Warp the face selected by `transform` into a square crop of
/// `face_size`, filling outside pixels with the border colour
pub fn warp_face(image: &RgbImage, transform: &AffineTransform, face_size: u32) -> Result<RgbImage> {
    let projection = transform.to_projection()?;
    let mut crop = RgbImage::from_pixel(face_size, face_size, BORDER_COLOR);
    warp_into(
        image,
        &projection,
        Interpolation::Bilinear,
        BORDER_COLOR,
        &mut crop,
    );
    Ok(crop)
}
