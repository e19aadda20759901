//! Conversions between image buffers and NCHW tensors

use crate::error::{PipelineError, Result};
use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use ndarray::{Array4, ArrayView2, ArrayView4};

/// Per-channel normalisation applied when building an input tensor
///
/// `value = (pixel * scale - mean) / std`, channels in RGB order unless
/// `bgr` is set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub scale: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub bgr: bool,
}

impl Normalization {
    /// ImageNet statistics on [0, 1] pixels
    pub const IMAGENET: Self = Self {
        scale: 1.0 / 255.0,
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
        bgr: false,
    };

    /// Plain [0, 1] pixels
    pub const UNIT: Self = Self {
        scale: 1.0 / 255.0,
        mean: [0.0, 0.0, 0.0],
        std: [1.0, 1.0, 1.0],
        bgr: false,
    };

    /// [-1, 1] pixels
    pub const SYMMETRIC: Self = Self {
        scale: 1.0 / 255.0,
        mean: [0.5, 0.5, 0.5],
        std: [0.5, 0.5, 0.5],
        bgr: false,
    };

    /// Raw BGR pixels minus the Caffe channel means
    pub const CAFFE_BGR: Self = Self {
        scale: 1.0,
        mean: [104.0, 117.0, 123.0],
        std: [1.0, 1.0, 1.0],
        bgr: true,
    };

    fn tensor_channel(&self, rgb_channel: usize) -> usize {
        if self.bgr {
            2 - rgb_channel
        } else {
            rgb_channel
        }
    }
}

/// Build a `1x3xHxW` tensor from an RGB image
#[must_use]
pub fn to_nchw(image: &RgbImage, norm: &Normalization) -> Array4<f32> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, height, width));

    #[allow(clippy::indexing_slicing)]
    // Safe: tensor dimensions pre-allocated to match the image size
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            let tc = norm.tensor_channel(c);
            let value = (f32::from(pixel[c]) * norm.scale - norm.mean[tc]) / norm.std[tc];
            tensor[[0, tc, y as usize, x as usize]] = value;
        }
    }

    tensor
}

/// Invert `to_nchw`, clamping to the 8-bit range
pub fn from_nchw(tensor: ArrayView4<'_, f32>, norm: &Normalization) -> Result<RgbImage> {
    let shape = tensor.shape();
    if shape.len() != 4 || shape.first() != Some(&1) || shape.get(1) != Some(&3) {
        return Err(PipelineError::processing(format!(
            "Expected a 1x3xHxW tensor, got {:?}",
            shape
        )));
    }
    let height = shape.get(2).copied().unwrap_or(0);
    let width = shape.get(3).copied().unwrap_or(0);

    let mut image: RgbImage = ImageBuffer::new(width as u32, height as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let mut rgb = [0u8; 3];
        for (c, out) in rgb.iter_mut().enumerate() {
            let tc = norm.tensor_channel(c);
            let value = tensor
                .get([0, tc, y as usize, x as usize])
                .copied()
                .unwrap_or(0.0);
            let pixel_value = (value * norm.std[tc] + norm.mean[tc]) / norm.scale;
            *out = pixel_value.round().clamp(0.0, 255.0) as u8;
        }
        *pixel = Rgb(rgb);
    }
    Ok(image)
}

/// Aspect-preserving resize onto a padded square canvas
#[derive(Debug, Clone)]
pub struct Letterbox {
    pub canvas: RgbImage,
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// Size of the resized image inside the canvas
    pub content_width: u32,
    pub content_height: u32,
}

impl Letterbox {
    /// Fit `image` into a `target` square, centred, padding with `padding`
    pub fn fit(image: &RgbImage, target: u32, padding: [u8; 3]) -> Result<Self> {
        let (orig_width, orig_height) = image.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(PipelineError::processing("Cannot letterbox an empty image"));
        }

        let target_f32 = target as f32;
        let scale = (target_f32 / orig_width as f32).min(target_f32 / orig_height as f32);
        let new_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target);
        let new_height = ((orig_height as f32 * scale).round() as u32).clamp(1, target);

        let resized = image::imageops::resize(
            image,
            new_width,
            new_height,
            image::imageops::FilterType::Triangle,
        );

        let mut canvas = ImageBuffer::from_pixel(target, target, Rgb(padding));
        let offset_x = (target - new_width) / 2;
        let offset_y = (target - new_height) / 2;
        image::imageops::replace(&mut canvas, &resized, i64::from(offset_x), i64::from(offset_y));

        Ok(Self {
            canvas,
            scale,
            offset_x,
            offset_y,
            content_width: new_width,
            content_height: new_height,
        })
    }

    /// Map a mask predicted on the canvas back to the original image size.
    ///
    /// Values are min-max normalised over the whole prediction first, then
    /// sampled bilinearly at pixel centres inside the resized region.
    #[must_use]
    pub fn unfit_mask(&self, prediction: ArrayView2<'_, f32>, width: u32, height: u32) -> GrayImage {
        let (min, max) = prediction
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = if max - min > f32::EPSILON { max - min } else { 1.0 };

        let scale_x = self.content_width as f32 / width.max(1) as f32;
        let scale_y = self.content_height as f32 / height.max(1) as f32;
        let max_x = self.content_width.saturating_sub(1) as f32;
        let max_y = self.content_height.saturating_sub(1) as f32;
        let (ox, oy) = (self.offset_x as usize, self.offset_y as usize);

        let at = |cx: usize, cy: usize| {
            prediction
                .get([cy + oy, cx + ox])
                .map_or(0.0, |v| (v - min) / range)
        };

        GrayImage::from_fn(width, height, |x, y| {
            let sx = ((x as f32 + 0.5) * scale_x - 0.5).clamp(0.0, max_x);
            let sy = ((y as f32 + 0.5) * scale_y - 0.5).clamp(0.0, max_y);
            let (x0, y0) = (sx.floor() as usize, sy.floor() as usize);
            let x1 = (x0 + 1).min(max_x as usize);
            let y1 = (y0 + 1).min(max_y as usize);
            let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);

            let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
            let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
            let value = top * (1.0 - fy) + bottom * fy;
            Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_normalization_round_trip() {
        let image = RgbImage::from_fn(6, 4, |x, y| Rgb([(x * 40) as u8, (y * 60) as u8, 77]));

        for norm in [
            Normalization::IMAGENET,
            Normalization::UNIT,
            Normalization::SYMMETRIC,
            Normalization::CAFFE_BGR,
        ] {
            let tensor = to_nchw(&image, &norm);
            assert_eq!(tensor.shape(), &[1, 3, 4, 6]);
            assert_eq!(from_nchw(tensor.view(), &norm).unwrap(), image);
        }
    }

    #[test]
    fn test_caffe_channel_order() {
        let image = RgbImage::from_pixel(1, 1, Rgb([200, 150, 100]));
        let tensor = to_nchw(&image, &Normalization::CAFFE_BGR);

        assert!((tensor[[0, 0, 0, 0]] - (100.0 - 104.0)).abs() < 1e-5);
        assert!((tensor[[0, 2, 0, 0]] - (200.0 - 123.0)).abs() < 1e-5);
    }

    #[test]
    fn test_from_nchw_rejects_bad_shape() {
        let tensor = Array4::<f32>::zeros((1, 1, 8, 8));
        assert!(from_nchw(tensor.view(), &Normalization::UNIT).is_err());
    }

    #[test]
    fn test_letterbox_wide_image() {
        let image = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
        let letterbox = Letterbox::fit(&image, 320, [0, 0, 0]).unwrap();

        assert_eq!(letterbox.canvas.dimensions(), (320, 320));
        assert_eq!(letterbox.offset_x, 0);
        assert_eq!(letterbox.offset_y, 80);
        assert_eq!(*letterbox.canvas.get_pixel(10, 10), Rgb([0, 0, 0]));
        assert_eq!(*letterbox.canvas.get_pixel(160, 160), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_unfit_mask_normalises() {
        let image = RgbImage::new(100, 100);
        let letterbox = Letterbox::fit(&image, 50, [0, 0, 0]).unwrap();
        let prediction = Array2::from_shape_fn((50, 50), |(_, x)| if x < 25 { 0.2 } else { 0.6 });

        let mask = letterbox.unfit_mask(prediction.view(), 100, 100);
        assert_eq!(mask.dimensions(), (100, 100));
        assert_eq!(mask.get_pixel(10, 10)[0], 0);
        assert_eq!(mask.get_pixel(90, 10)[0], 255);
    }

    #[test]
    fn test_unfit_mask_reaches_last_row_and_column() {
        let image = RgbImage::new(1000, 1000);
        let letterbox = Letterbox::fit(&image, 320, [0, 0, 0]).unwrap();
        let mut prediction = Array2::from_elem((320, 320), 1.0f32);
        prediction[[0, 0]] = 0.0;

        let mask = letterbox.unfit_mask(prediction.view(), 1000, 1000);
        assert_eq!(mask.get_pixel(998, 500)[0], 255);
        assert_eq!(mask.get_pixel(999, 500)[0], 255);
        assert_eq!(mask.get_pixel(500, 999)[0], 255);
        assert_eq!(mask.get_pixel(999, 999)[0], 255);
    }

    #[test]
    fn test_unfit_mask_ignores_padding() {
        // 200x100 sits in rows 80..240 of the canvas; padding rows are zero
        let image = RgbImage::new(200, 100);
        let letterbox = Letterbox::fit(&image, 320, [0, 0, 0]).unwrap();
        let prediction = Array2::from_shape_fn((320, 320), |(y, _)| {
            if (80..240).contains(&y) {
                1.0
            } else {
                0.0
            }
        });

        let mask = letterbox.unfit_mask(prediction.view(), 200, 100);
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
        assert_eq!(mask.get_pixel(199, 99)[0], 255);
        assert_eq!(mask.get_pixel(100, 50)[0], 255);
    }
}
