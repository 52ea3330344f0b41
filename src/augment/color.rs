//! Photometric transforms on `[3, H, W]` tensors with values in [0, 1].

use candle_core::{DType, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;

use super::RandomTransform;
use crate::error::Result;

/// ITU-R 601 luma weights.
const LUMA: [f64; 3] = [0.2989, 0.587, 0.114];

/// Single-channel luma, `[1, H, W]`.
pub fn rgb_to_grayscale(image: &Tensor) -> Result<Tensor> {
    let r = image.narrow(0, 0, 1)?.affine(LUMA[0], 0.0)?;
    let g = image.narrow(0, 1, 1)?.affine(LUMA[1], 0.0)?;
    let b = image.narrow(0, 2, 1)?.affine(LUMA[2], 0.0)?;
    Ok(((r + g)? + b)?)
}

/// `factor * a + (1 - factor) * b`, clamped to [0, 1].
fn blend(a: &Tensor, b: &Tensor, factor: f64) -> Result<Tensor> {
    let mixed = a.affine(factor, 0.0)?.broadcast_add(&b.affine(1.0 - factor, 0.0)?)?;
    Ok(mixed.clamp(0.0, 1.0)?)
}

pub fn adjust_brightness(image: &Tensor, factor: f64) -> Result<Tensor> {
    Ok(image.affine(factor, 0.0)?.clamp(0.0, 1.0)?)
}

/// Blends towards the mean luma of the whole image.
pub fn adjust_contrast(image: &Tensor, factor: f64) -> Result<Tensor> {
    let mean = rgb_to_grayscale(image)?
        .mean_all()?
        .to_dtype(DType::F64)?
        .to_scalar::<f64>()?;
    Ok(image.affine(factor, (1.0 - factor) * mean)?.clamp(0.0, 1.0)?)
}

/// Blends towards the per-pixel luma.
pub fn adjust_saturation(image: &Tensor, factor: f64) -> Result<Tensor> {
    blend(image, &rgb_to_grayscale(image)?, factor)
}

/// Rotates hue by `shift` turns (`shift` in [-0.5, 0.5]).
///
/// The HSV round trip runs on the host: the image is copied off its device and the
/// result copied back, so on CUDA every hue-jittered view pays one transfer each way.
/// A zero shift returns the input untouched.
pub fn adjust_hue(image: &Tensor, shift: f64) -> Result<Tensor> {
    if shift == 0.0 {
        return Ok(image.clone());
    }
    let (c, h, w) = image.dims3()?;
    let dtype = image.dtype();
    let mut planes = image.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    let plane = h * w;
    for i in 0..plane {
        let (hue, sat, val) = rgb_to_hsv(planes[i], planes[plane + i], planes[2 * plane + i]);
        let hue = (hue as f64 + shift).rem_euclid(1.0) as f32;
        let (r, g, b) = hsv_to_rgb(hue, sat, val);
        planes[i] = r;
        planes[plane + i] = g;
        planes[2 * plane + i] = b;
    }
    Ok(Tensor::from_vec(planes, (c, h, w), image.device())?.to_dtype(dtype)?)
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);
    let cr = maxc - minc;
    if cr == 0.0 {
        return (0.0, 0.0, maxc);
    }
    let s = cr / maxc;
    let rc = (maxc - r) / cr;
    let gc = (maxc - g) / cr;
    let bc = (maxc - b) / cr;
    let h = if maxc == r {
        bc - gc
    } else if maxc == g {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    ((h / 6.0 + 1.0).rem_euclid(1.0), s, maxc)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let h6 = h * 6.0;
    let i = h6.floor();
    let f = h6 - i;
    let p = (v * (1.0 - s)).clamp(0.0, 1.0);
    let q = (v * (1.0 - s * f)).clamp(0.0, 1.0);
    let t = (v * (1.0 - s * (1.0 - f))).clamp(0.0, 1.0);
    match (i as i32).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterOp {
    Brightness,
    Contrast,
    Saturation,
    Hue,
}

/// One draw of [`ColorJitter`]: the application order and the four factors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterParams {
    pub order: [JitterOp; 4],
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub hue: f64,
}

/// Random brightness, contrast, saturation and hue, applied in a random order.
#[derive(Debug, Clone)]
pub struct ColorJitter {
    brightness: (f64, f64),
    contrast: (f64, f64),
    saturation: (f64, f64),
    hue: (f64, f64),
}

impl ColorJitter {
    /// Multiplicative factors are drawn from `[max(0, 1 - x), 1 + x]`, the hue shift from `[-hue, hue]`.
    pub fn new(brightness: f64, contrast: f64, saturation: f64, hue: f64) -> Self {
        let around_one = |x: f64| ((1.0 - x).max(0.0), 1.0 + x);
        Self {
            brightness: around_one(brightness),
            contrast: around_one(contrast),
            saturation: around_one(saturation),
            hue: (-hue, hue),
        }
    }
}

impl RandomTransform for ColorJitter {
    type Params = JitterParams;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, _height: usize, _width: usize) -> JitterParams {
        let mut order = [
            JitterOp::Brightness,
            JitterOp::Contrast,
            JitterOp::Saturation,
            JitterOp::Hue,
        ];
        order.shuffle(rng);
        JitterParams {
            order,
            brightness: rng.gen_range(self.brightness.0..=self.brightness.1),
            contrast: rng.gen_range(self.contrast.0..=self.contrast.1),
            saturation: rng.gen_range(self.saturation.0..=self.saturation.1),
            hue: rng.gen_range(self.hue.0..=self.hue.1),
        }
    }

    fn apply(&self, image: &Tensor, params: &JitterParams) -> Result<Tensor> {
        let mut out = image.clone();
        for op in params.order {
            out = match op {
                JitterOp::Brightness => adjust_brightness(&out, params.brightness)?,
                JitterOp::Contrast => adjust_contrast(&out, params.contrast)?,
                JitterOp::Saturation => adjust_saturation(&out, params.saturation)?,
                JitterOp::Hue => adjust_hue(&out, params.hue)?,
            };
        }
        Ok(out)
    }
}

/// Replaces the image with its luma on all three channels with probability `p`.
#[derive(Debug, Clone)]
pub struct RandomGrayscale {
    p: f64,
}

impl RandomGrayscale {
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

impl RandomTransform for RandomGrayscale {
    type Params = bool;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, _height: usize, _width: usize) -> bool {
        rng.gen::<f64>() < self.p
    }

    fn apply(&self, image: &Tensor, gray: &bool) -> Result<Tensor> {
        if !*gray {
            return Ok(image.clone());
        }
        let luma = rgb_to_grayscale(image)?;
        Ok(Tensor::cat(&[&luma, &luma, &luma], 0)?)
    }
}

/// `x >= threshold` becomes `1 - x`.
pub fn solarize(image: &Tensor, threshold: f64) -> Result<Tensor> {
    let bound = Tensor::full(threshold, image.dims(), image.device())?.to_dtype(image.dtype())?;
    let inverted = image.affine(-1.0, 1.0)?;
    Ok(image.ge(&bound)?.where_cond(&inverted, image)?)
}

/// Solarizes with probability `p`.
#[derive(Debug, Clone)]
pub struct RandomSolarize {
    threshold: f64,
    p: f64,
}

impl RandomSolarize {
    pub fn new(threshold: f64, p: f64) -> Self {
        Self { threshold, p }
    }
}

impl RandomTransform for RandomSolarize {
    type Params = bool;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, _height: usize, _width: usize) -> bool {
        rng.gen::<f64>() < self.p
    }

    fn apply(&self, image: &Tensor, solarized: &bool) -> Result<Tensor> {
        if *solarized {
            solarize(image, self.threshold)
        } else {
            Ok(image.clone())
        }
    }
}
