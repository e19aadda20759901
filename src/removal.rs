//! Background removal stage

use crate::{
    config::RemovalSettings,
    error::Result,
    inference::{BackgroundRemoval, Segmenter},
    types::{RemovalOutcome, SkipReason},
    utils::matting::{build_trimap, estimate_alpha},
};
use image::{imageops::FilterType, GrayImage, Rgba, RgbImage, RgbaImage};
use tracing::{debug, instrument, span, warn, Level};

/// Segments the foreground and cuts it out with an alpha channel
pub struct BackgroundRemover {
    segmenter: Box<dyn Segmenter>,
    settings: RemovalSettings,
}

impl BackgroundRemover {
    /// # Errors
    /// - Invalid removal settings
    pub fn new(segmenter: Box<dyn Segmenter>, settings: RemovalSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { segmenter, settings })
    }

    #[must_use]
    pub fn settings(&self) -> &RemovalSettings {
        &self.settings
    }

    /// Compute the alpha channel for `image`
    fn alpha_for(&mut self, image: &RgbImage) -> Result<GrayImage> {
        let mask = {
            let _span = span!(Level::DEBUG, "segmentation").entered();
            self.segmenter.segment(image)?
        };

        let mask = if mask.dimensions() == image.dimensions() {
            mask
        } else {
            debug!(
                mask_width = mask.width(),
                mask_height = mask.height(),
                "Resizing segmentation mask to image size"
            );
            image::imageops::resize(&mask, image.width(), image.height(), FilterType::Triangle)
        };

        if !self.settings.alpha_matting {
            return Ok(mask);
        }

        let _span = span!(Level::DEBUG, "alpha_matting").entered();
        let trimap = build_trimap(
            &mask,
            self.settings.foreground_threshold,
            self.settings.background_threshold,
            self.settings.erode_size,
        );
        Ok(estimate_alpha(image, &trimap, &mask, self.settings.matting_radius))
    }

    fn cutout(&mut self, image: &RgbImage) -> Result<RgbaImage> {
        let alpha = self.alpha_for(image)?;
        Ok(apply_alpha(image, &alpha))
    }
}

impl BackgroundRemoval for BackgroundRemover {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn remove_background(&mut self, image: &RgbImage) -> Result<RemovalOutcome> {
        match self.cutout(image) {
            Ok(cutout) => Ok(RemovalOutcome::Removed(cutout)),
            Err(e) if e.is_io_class() => {
                warn!(error = %e, "Background removal failed, skipping item");
                Ok(RemovalOutcome::Skipped(SkipReason::BackgroundRemoval(
                    e.to_string(),
                )))
            },
            Err(e) => Err(e),
        }
    }
}

/// Attach `alpha` to `image`. Fully transparent pixels are zeroed.
fn apply_alpha(image: &RgbImage, alpha: &GrayImage) -> RgbaImage {
    RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let a = alpha.get_pixel(x, y)[0];
        if a == 0 {
            Rgba([0, 0, 0, 0])
        } else {
            let p = image.get_pixel(x, y);
            Rgba([p[0], p[1], p[2], a])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use image::{Luma, Rgb};

    struct HalfSegmenter;

    impl Segmenter for HalfSegmenter {
        fn segment(&mut self, image: &RgbImage) -> Result<GrayImage> {
            Ok(GrayImage::from_fn(image.width(), image.height(), |x, _| {
                if x < image.width() / 2 {
                    Luma([255])
                } else {
                    Luma([0])
                }
            }))
        }
    }

    struct BrokenSegmenter(fn() -> PipelineError);

    impl Segmenter for BrokenSegmenter {
        fn segment(&mut self, _image: &RgbImage) -> Result<GrayImage> {
            Err((self.0)())
        }
    }

    fn image() -> RgbImage {
        RgbImage::from_pixel(32, 32, Rgb([200, 150, 100]))
    }

    #[test]
    fn test_removed_without_matting() {
        let settings = RemovalSettings {
            alpha_matting: false,
            ..RemovalSettings::default()
        };
        let mut remover = BackgroundRemover::new(Box::new(HalfSegmenter), settings).unwrap();

        let RemovalOutcome::Removed(cutout) = remover.remove_background(&image()).unwrap() else {
            panic!("expected a cutout");
        };
        assert_eq!(*cutout.get_pixel(3, 3), Rgba([200, 150, 100, 255]));
        assert_eq!(*cutout.get_pixel(30, 3), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn test_removed_with_matting() {
        let mut remover =
            BackgroundRemover::new(Box::new(HalfSegmenter), RemovalSettings::default()).unwrap();

        let outcome = remover.remove_background(&image()).unwrap();
        let RemovalOutcome::Removed(cutout) = outcome else {
            panic!("expected a cutout");
        };
        assert_eq!(cutout.dimensions(), (32, 32));
        assert_eq!(cutout.get_pixel(0, 16)[3], 255);
        assert_eq!(cutout.get_pixel(31, 16)[3], 0);
    }

    #[test]
    fn test_io_failure_skips() {
        let segmenter = BrokenSegmenter(|| {
            PipelineError::from(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated model output",
            ))
        });
        let mut remover =
            BackgroundRemover::new(Box::new(segmenter), RemovalSettings::default()).unwrap();

        let outcome = remover.remove_background(&image()).unwrap();
        assert!(matches!(
            outcome,
            RemovalOutcome::Skipped(SkipReason::BackgroundRemoval(_))
        ));
    }

    #[test]
    fn test_other_failure_propagates() {
        let segmenter = BrokenSegmenter(|| PipelineError::inference("bad output shape"));
        let mut remover =
            BackgroundRemover::new(Box::new(segmenter), RemovalSettings::default()).unwrap();

        assert!(remover.remove_background(&image()).is_err());
    }
}
