//! The view augmentation pipeline.
//!
//! One call turns an image into one normalized `[3, 224, 224]` view:
//! to-tensor, random resized crop, horizontal flip, color jitter, grayscale,
//! gated Gaussian blur, solarize, normalize. Every stochastic step makes its own
//! independent draw on every call. Parameters are fixed constants.

pub mod blur;
pub mod color;
pub mod geometric;
pub mod tensor;

use candle_core::{Device, Tensor};
use image::{DynamicImage, RgbImage};
use rand::Rng;
use std::path::Path;

pub use blur::{gaussian_blur, GaussianBlur, RandomGaussianBlur};
pub use color::{ColorJitter, JitterOp, JitterParams, RandomGrayscale, RandomSolarize};
pub use geometric::{CropBox, RandomHorizontalFlip, RandomResizedCrop};
pub use tensor::{image_to_tensor, load_image, Normalize};

use crate::error::Result;

pub const VIEW_SIZE: usize = 224;
pub const CROP_SCALE: (f64, f64) = (0.08, 1.0);
/// Aspect range as published for this recipe. Far narrower than the usual (3/4, 4/3).
pub const CROP_RATIO: (f64, f64) = (0.08, 1.0);
pub const FLIP_P: f64 = 0.5;
pub const JITTER_BRIGHTNESS: f64 = 0.4;
pub const JITTER_CONTRAST: f64 = 0.4;
pub const JITTER_SATURATION: f64 = 0.2;
pub const JITTER_HUE: f64 = 0.1;
pub const GRAYSCALE_P: f64 = 0.2;
pub const BLUR_KERNEL_SIZE: usize = 23;
pub const BLUR_P: f64 = 0.5;
pub const SOLARIZE_THRESHOLD: f64 = 0.5;
pub const SOLARIZE_P: f64 = 0.1;
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A transform split into a random draw and a deterministic application.
pub trait RandomTransform {
    type Params;

    /// Draws this step's parameters for an image of `height x width`.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, height: usize, width: usize) -> Self::Params;

    fn apply(&self, image: &Tensor, params: &Self::Params) -> Result<Tensor>;

    fn forward<R: Rng + ?Sized>(&self, image: &Tensor, rng: &mut R) -> Result<Tensor> {
        let (_, h, w) = image.dims3()?;
        let params = self.sample(rng, h, w);
        self.apply(image, &params)
    }
}

/// Every random decision behind one view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParams {
    pub crop: CropBox,
    pub flip: bool,
    pub jitter: JitterParams,
    pub grayscale: bool,
    /// `Some(sigma)` when the blur gate passed.
    pub blur: Option<f64>,
    pub solarize: bool,
}

pub struct AugmentationPipeline {
    device: Device,
    crop: RandomResizedCrop,
    flip: RandomHorizontalFlip,
    jitter: ColorJitter,
    grayscale: RandomGrayscale,
    blur: RandomGaussianBlur,
    solarize: RandomSolarize,
    normalize: Normalize,
}

impl AugmentationPipeline {
    pub fn new(device: &Device) -> Result<Self> {
        Ok(Self {
            device: device.clone(),
            crop: RandomResizedCrop::new(VIEW_SIZE, CROP_SCALE, CROP_RATIO),
            flip: RandomHorizontalFlip::new(FLIP_P),
            jitter: ColorJitter::new(
                JITTER_BRIGHTNESS,
                JITTER_CONTRAST,
                JITTER_SATURATION,
                JITTER_HUE,
            ),
            grayscale: RandomGrayscale::new(GRAYSCALE_P),
            blur: RandomGaussianBlur::new(BLUR_KERNEL_SIZE, BLUR_P),
            solarize: RandomSolarize::new(SOLARIZE_THRESHOLD, SOLARIZE_P),
            normalize: Normalize::new(IMAGENET_MEAN, IMAGENET_STD, device)?,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Draws all step parameters in pipeline order.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, height: usize, width: usize) -> ViewParams {
        let params = ViewParams {
            crop: self.crop.sample(rng, height, width),
            flip: self.flip.sample(rng, VIEW_SIZE, VIEW_SIZE),
            jitter: self.jitter.sample(rng, VIEW_SIZE, VIEW_SIZE),
            grayscale: self.grayscale.sample(rng, VIEW_SIZE, VIEW_SIZE),
            blur: self.blur.sample(rng, VIEW_SIZE, VIEW_SIZE),
            solarize: self.solarize.sample(rng, VIEW_SIZE, VIEW_SIZE),
        };
        tracing::debug!(?params, "sampled view");
        params
    }

    /// Runs steps 2-8 on a `[3, H, W]` tensor in [0, 1] with fixed parameters.
    pub fn apply(&self, image: &Tensor, params: &ViewParams) -> Result<Tensor> {
        let x = self.crop.apply(image, &params.crop)?;
        let x = self.flip.apply(&x, &params.flip)?;
        let x = self.jitter.apply(&x, &params.jitter)?;
        let x = self.grayscale.apply(&x, &params.grayscale)?;
        let x = self.blur.apply(&x, &params.blur)?;
        let x = self.solarize.apply(&x, &params.solarize)?;
        self.normalize.forward(&x)
    }

    pub fn view_from_tensor_with<R: Rng + ?Sized>(&self, image: &Tensor, rng: &mut R) -> Result<Tensor> {
        let (_, h, w) = image.dims3()?;
        let params = self.sample(rng, h, w);
        self.apply(image, &params)
    }

    /// One view drawn from `rng`.
    pub fn view_with<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> Result<Tensor> {
        let x = image_to_tensor(image, &self.device)?;
        self.view_from_tensor_with(&x, rng)
    }

    /// One view drawn from the thread-local generator.
    pub fn view(&self, image: &DynamicImage) -> Result<Tensor> {
        self.view_with(image, &mut rand::thread_rng())
    }

    pub fn view_from_path(&self, path: impl AsRef<Path>) -> Result<Tensor> {
        self.view(&load_image(path)?)
    }

    /// The two correlated views of one sample: two independent runs of the pipeline.
    pub fn views_with<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> Result<(Tensor, Tensor)> {
        let x = image_to_tensor(image, &self.device)?;
        let top = self.view_from_tensor_with(&x, rng)?;
        let bottom = self.view_from_tensor_with(&x, rng)?;
        Ok((top, bottom))
    }

    pub fn views(&self, image: &DynamicImage) -> Result<(Tensor, Tensor)> {
        self.views_with(image, &mut rand::thread_rng())
    }

    /// Undoes normalization so a view can be saved and inspected.
    pub fn to_image(&self, view: &Tensor) -> Result<RgbImage> {
        tensor::tensor_to_image(&self.normalize.inverse(view)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gradient(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x * 255 / w.max(1)) as u8, (y * 255 / h.max(1)) as u8, 128])
        }))
    }

    #[test]
    fn test_view_shape_is_fixed() -> Result<()> {
        let pipeline = AugmentationPipeline::new(&Device::Cpu)?;
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for &(w, h) in &[(300u32, 200u32), (17, 500), (224, 224), (5, 3), (1, 1)] {
            let view = pipeline.view_with(&gradient(w, h), &mut rng)?;
            assert_eq!(view.dims(), &[3, VIEW_SIZE, VIEW_SIZE], "input {w}x{h}");
        }
        Ok(())
    }

    #[test]
    fn test_default_rng_path() -> Result<()> {
        let pipeline = AugmentationPipeline::new(&Device::Cpu)?;
        let (top, bottom) = pipeline.views(&gradient(64, 48))?;
        assert_eq!(top.dims(), bottom.dims());
        Ok(())
    }

    #[test]
    fn test_seeded_views_are_reproducible() -> Result<()> {
        let pipeline = AugmentationPipeline::new(&Device::Cpu)?;
        let img = gradient(120, 90);
        let a = pipeline.view_with(&img, &mut ChaCha8Rng::seed_from_u64(9))?;
        let b = pipeline.view_with(&img, &mut ChaCha8Rng::seed_from_u64(9))?;
        assert_eq!(a.flatten_all()?.to_vec1::<f32>()?, b.flatten_all()?.to_vec1::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_two_views_draw_independently() -> Result<()> {
        let pipeline = AugmentationPipeline::new(&Device::Cpu)?;
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let (top, bottom) = pipeline.views_with(&gradient(200, 150), &mut rng)?;
        let diff = (top - bottom)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert!(diff > 0.0);
        Ok(())
    }

    #[test]
    fn test_step_frequencies() -> Result<()> {
        let pipeline = AugmentationPipeline::new(&Device::Cpu)?;
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        let n = 1000;
        let (mut flips, mut grays, mut blurs, mut solars) = (0, 0, 0, 0);
        for _ in 0..n {
            let p = pipeline.sample(&mut rng, 375, 500);
            flips += p.flip as usize;
            grays += p.grayscale as usize;
            blurs += p.blur.is_some() as usize;
            solars += p.solarize as usize;
        }
        let rate = |k: usize| k as f64 / n as f64;
        assert!((rate(flips) - FLIP_P).abs() < 0.05, "flip {}", rate(flips));
        assert!((rate(grays) - GRAYSCALE_P).abs() < 0.05, "gray {}", rate(grays));
        assert!((rate(blurs) - BLUR_P).abs() < 0.05, "blur {}", rate(blurs));
        assert!((rate(solars) - SOLARIZE_P).abs() < 0.05, "solarize {}", rate(solars));
        Ok(())
    }

    #[test]
    fn test_identity_params_only_resize_and_normalize() -> Result<()> {
        let pipeline = AugmentationPipeline::new(&Device::Cpu)?;
        let img = gradient(VIEW_SIZE as u32, VIEW_SIZE as u32);
        let params = ViewParams {
            crop: CropBox {
                top: 0,
                left: 0,
                height: VIEW_SIZE,
                width: VIEW_SIZE,
            },
            flip: false,
            jitter: JitterParams {
                order: [
                    JitterOp::Brightness,
                    JitterOp::Contrast,
                    JitterOp::Saturation,
                    JitterOp::Hue,
                ],
                brightness: 1.0,
                contrast: 1.0,
                saturation: 1.0,
                hue: 0.0,
            },
            grayscale: false,
            blur: None,
            solarize: false,
        };
        let x = image_to_tensor(&img, &Device::Cpu)?;
        let view = pipeline.apply(&x, &params)?;
        assert_eq!(pipeline.to_image(&view)?, img.to_rgb8());
        Ok(())
    }
}
