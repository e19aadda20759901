//! Trimap construction and closed-form alpha estimation for soft edges

use image::{GrayImage, Luma, RgbImage};
use imageproc::{distance_transform::Norm, morphology::erode};

/// Trimap value of certain foreground
pub const TRIMAP_FOREGROUND: u8 = 255;
/// Trimap value of certain background
pub const TRIMAP_BACKGROUND: u8 = 0;
/// Trimap value of pixels whose alpha must be estimated
pub const TRIMAP_UNKNOWN: u8 = 128;

fn threshold(mask: &GrayImage, keep: impl Fn(u8) -> bool) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if keep(mask.get_pixel(x, y)[0]) {
            Luma([u8::MAX])
        } else {
            Luma([0])
        }
    })
}

fn erode_square(region: &GrayImage, size: u32) -> GrayImage {
    let radius = (size / 2).min(u32::from(u8::MAX)) as u8;
    if radius == 0 {
        region.clone()
    } else {
        erode(region, Norm::LInf, radius)
    }
}

/// Split a soft segmentation mask into certain foreground, certain
/// background and an unknown band between them.
///
/// Both certain regions are shrunk by a square of side `erode_size`.
#[must_use]
pub fn build_trimap(
    mask: &GrayImage,
    foreground_threshold: u8,
    background_threshold: u8,
    erode_size: u32,
) -> GrayImage {
    let foreground = erode_square(&threshold(mask, |v| v > foreground_threshold), erode_size);
    let background = erode_square(&threshold(mask, |v| v < background_threshold), erode_size);

    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if foreground.get_pixel(x, y)[0] > 0 {
            Luma([TRIMAP_FOREGROUND])
        } else if background.get_pixel(x, y)[0] > 0 {
            Luma([TRIMAP_BACKGROUND])
        } else {
            Luma([TRIMAP_UNKNOWN])
        }
    })
}

/// Summed-area table over per-pixel colour sums and counts of one trimap class
struct ColorIntegral {
    stride: usize,
    // r, g, b, count
    sums: Vec<[u64; 4]>,
}

impl ColorIntegral {
    #[allow(clippy::indexing_slicing)]
    // Safe: every index is below (width + 1) * (height + 1)
    fn new(image: &RgbImage, trimap: &GrayImage, class: u8) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let stride = width + 1;
        let mut sums = vec![[0u64; 4]; stride * (height + 1)];

        for y in 0..height {
            let mut row = [0u64; 4];
            for x in 0..width {
                if trimap.get_pixel(x as u32, y as u32)[0] == class {
                    let p = image.get_pixel(x as u32, y as u32);
                    row[0] += u64::from(p[0]);
                    row[1] += u64::from(p[1]);
                    row[2] += u64::from(p[2]);
                    row[3] += 1;
                }
                let above = sums[y * stride + x + 1];
                sums[(y + 1) * stride + x + 1] = [
                    above[0] + row[0],
                    above[1] + row[1],
                    above[2] + row[2],
                    above[3] + row[3],
                ];
            }
        }

        Self { stride, sums }
    }

    /// Mean colour inside the inclusive window, `None` if it holds no pixel of the class
    #[allow(clippy::indexing_slicing)]
    // Safe: callers clamp the window to the image bounds
    fn mean(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> Option<[f32; 3]> {
        let at = |x: usize, y: usize| self.sums[y * self.stride + x];
        let (a, b, c, d) = (at(x0, y0), at(x1 + 1, y0), at(x0, y1 + 1), at(x1 + 1, y1 + 1));
        let total = |i: usize| d[i] + a[i] - b[i] - c[i];

        let count = total(3);
        if count == 0 {
            return None;
        }
        let n = count as f32;
        Some([total(0) as f32 / n, total(1) as f32 / n, total(2) as f32 / n])
    }
}

/// Estimate alpha for the unknown trimap band.
///
/// Each unknown pixel is projected onto the line joining the mean
/// foreground and mean background colours found within `radius`. Pixels
/// without both references fall back to the raw mask value.
#[must_use]
pub fn estimate_alpha(image: &RgbImage, trimap: &GrayImage, mask: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let foreground = ColorIntegral::new(image, trimap, TRIMAP_FOREGROUND);
    let background = ColorIntegral::new(image, trimap, TRIMAP_BACKGROUND);

    GrayImage::from_fn(width, height, |x, y| {
        match trimap.get_pixel(x, y)[0] {
            TRIMAP_FOREGROUND => return Luma([u8::MAX]),
            TRIMAP_BACKGROUND => return Luma([0]),
            _ => {}
        }

        let x0 = x.saturating_sub(radius) as usize;
        let y0 = y.saturating_sub(radius) as usize;
        let x1 = (x + radius).min(width - 1) as usize;
        let y1 = (y + radius).min(height - 1) as usize;

        let fallback = Luma([mask.get_pixel(x, y)[0]]);
        let (Some(fg), Some(bg)) = (
            foreground.mean(x0, y0, x1, y1),
            background.mean(x0, y0, x1, y1),
        ) else {
            return fallback;
        };

        let pixel = image.get_pixel(x, y);
        let mut num = 0.0f32;
        let mut den = 0.0f32;
        for c in 0..3 {
            let diff = fg[c] - bg[c];
            num += (f32::from(pixel[c]) - bg[c]) * diff;
            den += diff * diff;
        }
        if den < 1.0 {
            return fallback;
        }

        let alpha = (num / den).clamp(0.0, 1.0);
        Luma([(alpha * 255.0).round() as u8])
    })
}
