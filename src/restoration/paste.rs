//! Paste restored faces back into the upscaled background

use super::align::AffineTransform;
use crate::error::{PipelineError, Result};
use image::{GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use imageproc::{
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    geometric_transformations::{warp_into, Interpolation},
    morphology::erode,
};

/// Masks controlling how one face is blended into the background
#[derive(Debug, Clone)]
pub struct FaceMask {
    /// Warped face region eroded by the upscale border
    pub hard: GrayImage,
    /// `hard` eroded further and feathered
    pub soft: GrayImage,
}

/// Transform from crop coordinates to upscaled output coordinates
pub fn inverse_for_paste(affine: &AffineTransform, upscale: u32) -> Result<AffineTransform> {
    let inverse = affine
        .invert()
        .ok_or_else(|| PipelineError::processing("Face alignment transform is singular"))?
        .scaled(upscale as f32);

    if upscale > 1 {
        let offset = 0.5 * upscale as f32;
        Ok(inverse.translated(offset, offset))
    } else {
        Ok(inverse)
    }
}

/// OpenCV's sigma for a Gaussian kernel of the given size
fn kernel_sigma(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Square erosion approximating a `size` x `size` kernel
fn erode_square(mask: &GrayImage, size: u32) -> GrayImage {
    let radius = (size / 2).min(u32::from(u8::MAX)) as u8;
    if radius == 0 {
        return mask.clone();
    }
    erode(mask, Norm::LInf, radius)
}

/// Gaussian blur computed in floating point and rounded once
fn feather(mask: &GrayImage, sigma: f32) -> GrayImage {
    let levels: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(mask.width(), mask.height(), |x, y| {
            Luma([f32::from(mask.get_pixel(x, y)[0])])
        });
    let blurred = gaussian_blur_f32(&levels, sigma);
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([blurred.get_pixel(x, y)[0].round().clamp(0.0, 255.0) as u8])
    })
}

/// Build the hard and feathered masks of a face warped into an output of
/// `width` x `height`
pub fn face_masks(
    inverse: &AffineTransform,
    face_size: u32,
    width: u32,
    height: u32,
    upscale: u32,
) -> Result<FaceMask> {
    let projection = inverse.to_projection()?;
    let ones = GrayImage::from_pixel(face_size, face_size, Luma([u8::MAX]));
    let mut warped = GrayImage::new(width, height);
    warp_into(&ones, &projection, Interpolation::Bilinear, Luma([0]), &mut warped);

    let hard = erode_square(&warped, 2 * upscale);

    let area = hard.pixels().map(|p| u64::from(p[0])).sum::<u64>() as f64 / 255.0;
    let w_edge = (area.sqrt() as u32) / 20;
    if w_edge == 0 {
        let soft = hard.clone();
        return Ok(FaceMask { hard, soft });
    }

    let center = erode_square(&hard, 2 * w_edge);
    let soft = feather(&center, kernel_sigma(2 * w_edge + 1));

    Ok(FaceMask { hard, soft })
}

/// Blend `face` over the colour channels of `background`.
///
/// Any channel past the third (alpha) is left untouched.
pub fn composite<P>(background: &mut ImageBuffer<P, Vec<u8>>, face: &RgbImage, mask: &FaceMask)
where
    P: Pixel<Subpixel = u8>,
{
    for (x, y, pixel) in background.enumerate_pixels_mut() {
        let soft = f32::from(mask.soft.get_pixel(x, y)[0]) / 255.0;
        if soft <= 0.0 {
            continue;
        }
        let hard = f32::from(mask.hard.get_pixel(x, y)[0]) / 255.0;
        let source = face.get_pixel(x, y);

        for (channel, value) in pixel.channels_mut().iter_mut().zip(source.0.iter()).take(3) {
            let blended = soft * hard * f32::from(*value) + (1.0 - soft) * f32::from(*channel);
            *channel = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Paste one restored face into the upscaled background.
///
/// `affine` is the alignment transform that produced the face crop from the
/// original (non-upscaled) image.
pub fn paste_face<P>(
    background: &mut ImageBuffer<P, Vec<u8>>,
    restored_face: &RgbImage,
    affine: &AffineTransform,
    upscale: u32,
) -> Result<()>
where
    P: Pixel<Subpixel = u8>,
{
    let (width, height) = background.dimensions();
    let inverse = inverse_for_paste(affine, upscale)?;

    let mut warped_face = RgbImage::new(width, height);
    warp_into(
        restored_face,
        &inverse.to_projection()?,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut warped_face,
    );

    let mask = face_masks(&inverse, restored_face.width(), width, height, upscale)?;
    composite(background, &warped_face, &mask);
    Ok(())
}
