//! Crop, resize and flip on `[C, H, W]` tensors.

use candle_core::Tensor;
use rand::Rng;

use super::RandomTransform;
use crate::error::Result;

/// Region of the source image kept by [`RandomResizedCrop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub top: usize,
    pub left: usize,
    pub height: usize,
    pub width: usize,
}

/// Crops a random region covering `scale` of the area with aspect ratio in `ratio`,
/// then resizes it to `size x size`.
#[derive(Debug, Clone)]
pub struct RandomResizedCrop {
    size: usize,
    scale: (f64, f64),
    ratio: (f64, f64),
}

impl RandomResizedCrop {
    const ATTEMPTS: usize = 10;

    pub fn new(size: usize, scale: (f64, f64), ratio: (f64, f64)) -> Self {
        Self { size, scale, ratio }
    }

    /// Centre crop with the aspect ratio clamped into range, used when every attempt misses.
    fn fallback(&self, height: usize, width: usize) -> CropBox {
        let in_ratio = width as f64 / height as f64;
        let (ch, cw) = if in_ratio < self.ratio.0 {
            ((width as f64 / self.ratio.0).round() as usize, width)
        } else if in_ratio > self.ratio.1 {
            (height, (height as f64 * self.ratio.1).round() as usize)
        } else {
            (height, width)
        };
        let (ch, cw) = (ch.clamp(1, height), cw.clamp(1, width));
        CropBox {
            top: (height - ch) / 2,
            left: (width - cw) / 2,
            height: ch,
            width: cw,
        }
    }
}

impl RandomTransform for RandomResizedCrop {
    type Params = CropBox;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, height: usize, width: usize) -> CropBox {
        let area = (height * width) as f64;
        for _ in 0..Self::ATTEMPTS {
            let target_area = area * rng.gen_range(self.scale.0..=self.scale.1);
            let aspect = rng.gen_range(self.ratio.0..=self.ratio.1);
            let cw = (target_area * aspect).sqrt().round() as usize;
            let ch = (target_area / aspect).sqrt().round() as usize;
            if cw > 0 && cw <= width && ch > 0 && ch <= height {
                return CropBox {
                    top: rng.gen_range(0..=height - ch),
                    left: rng.gen_range(0..=width - cw),
                    height: ch,
                    width: cw,
                };
            }
        }
        self.fallback(height, width)
    }

    fn apply(&self, image: &Tensor, crop: &CropBox) -> Result<Tensor> {
        let region = image
            .narrow(1, crop.top, crop.height)?
            .narrow(2, crop.left, crop.width)?;
        resize_bilinear(&region, self.size, self.size)
    }
}

/// Mirrors the image left to right with probability `p`.
#[derive(Debug, Clone)]
pub struct RandomHorizontalFlip {
    p: f64,
}

impl RandomHorizontalFlip {
    pub fn new(p: f64) -> Self {
        Self { p }
    }
}

impl RandomTransform for RandomHorizontalFlip {
    type Params = bool;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, _height: usize, _width: usize) -> bool {
        rng.gen::<f64>() < self.p
    }

    fn apply(&self, image: &Tensor, flip: &bool) -> Result<Tensor> {
        if *flip {
            hflip(image)
        } else {
            Ok(image.clone())
        }
    }
}

pub fn hflip(image: &Tensor) -> Result<Tensor> {
    let (_, _, w) = image.dims3()?;
    let idx: Vec<u32> = (0..w as u32).rev().collect();
    let idx = Tensor::from_vec(idx, (w,), image.device())?;
    Ok(image.contiguous()?.index_select(&idx, 2)?)
}

/// Source taps and blend weights for one axis, half-pixel centres, no antialiasing.
fn axis_taps(in_len: usize, out_len: usize) -> (Vec<u32>, Vec<u32>, Vec<f32>) {
    let scale = in_len as f64 / out_len as f64;
    let mut lo = Vec::with_capacity(out_len);
    let mut hi = Vec::with_capacity(out_len);
    let mut frac = Vec::with_capacity(out_len);
    for o in 0..out_len {
        let src = ((o as f64 + 0.5) * scale - 0.5).max(0.0);
        let i0 = (src.floor() as usize).min(in_len - 1);
        let i1 = (i0 + 1).min(in_len - 1);
        lo.push(i0 as u32);
        hi.push(i1 as u32);
        frac.push((src - i0 as f64) as f32);
    }
    (lo, hi, frac)
}

fn resize_axis(image: &Tensor, dim: usize, out_len: usize) -> Result<Tensor> {
    let in_len = image.dim(dim)?;
    if in_len == out_len {
        return Ok(image.clone());
    }
    let device = image.device();
    let image = image.contiguous()?;
    let (lo, hi, frac) = axis_taps(in_len, out_len);
    let a = image.index_select(&Tensor::from_vec(lo, (out_len,), device)?, dim)?;
    let b = image.index_select(&Tensor::from_vec(hi, (out_len,), device)?, dim)?;
    let mut shape = vec![1usize; image.rank()];
    shape[dim] = out_len;
    let w = Tensor::from_vec(frac, shape, device)?.to_dtype(image.dtype())?;
    Ok(a.broadcast_add(&(b - &a)?.broadcast_mul(&w)?)?)
}

/// Separable bilinear resize of a `[C, H, W]` tensor.
pub fn resize_bilinear(image: &Tensor, out_h: usize, out_w: usize) -> Result<Tensor> {
    let (_, h, w) = image.dims3()?;
    tracing::trace!(h, w, out_h, out_w, "resize");
    let resized = resize_axis(image, 1, out_h)?;
    resize_axis(&resized, 2, out_w)
}
