//! Gaussian blur behind an explicit probability gate.

use candle_core::Tensor;
use rand::Rng;

use super::RandomTransform;
use crate::error::Result;

/// Normalised 1-D Gaussian taps centred on the middle of `kernel_size`.
pub fn gaussian_kernel1d(kernel_size: usize, sigma: f64) -> Vec<f32> {
    let half = (kernel_size as f64 - 1.0) * 0.5;
    let pdf: Vec<f64> = (0..kernel_size)
        .map(|i| {
            let x = (i as f64 - half) / sigma;
            (-0.5 * x * x).exp()
        })
        .collect();
    let sum: f64 = pdf.iter().sum();
    pdf.iter().map(|v| (v / sum) as f32).collect()
}

/// Reflect (edge not repeated) indices for padding an axis of `len` by `pad` on both sides.
fn reflect_indices(len: usize, pad: usize) -> Vec<u32> {
    if len == 1 {
        return vec![0; 1 + 2 * pad];
    }
    let period = 2 * (len as i64 - 1);
    (-(pad as i64)..(len + pad) as i64)
        .map(|i| {
            let m = i.rem_euclid(period);
            (if m >= len as i64 { period - m } else { m }) as u32
        })
        .collect()
}

fn reflect_pad(image: &Tensor, pad: usize) -> Result<Tensor> {
    let (_, h, w) = image.dims3()?;
    let device = image.device();
    let rows = Tensor::from_vec(reflect_indices(h, pad), (h + 2 * pad,), device)?;
    let cols = Tensor::from_vec(reflect_indices(w, pad), (w + 2 * pad,), device)?;
    Ok(image
        .contiguous()?
        .index_select(&rows, 1)?
        .index_select(&cols, 2)?)
}

/// Separable blur of a `[C, H, W]` tensor with reflect padding; output keeps the input shape.
pub fn gaussian_blur(image: &Tensor, kernel_size: usize, sigma: f64) -> Result<Tensor> {
    let (c, _, _) = image.dims3()?;
    let device = image.device();
    let taps = gaussian_kernel1d(kernel_size, sigma);
    let kx = Tensor::from_vec(taps.clone(), (1, 1, 1, kernel_size), device)?
        .to_dtype(image.dtype())?
        .repeat((c, 1, 1, 1))?;
    let ky = Tensor::from_vec(taps, (1, 1, kernel_size, 1), device)?
        .to_dtype(image.dtype())?
        .repeat((c, 1, 1, 1))?;

    let padded = reflect_pad(image, kernel_size / 2)?.unsqueeze(0)?;
    // depthwise: one group per channel
    let out = padded.conv2d(&kx, 0, 1, 1, c)?.conv2d(&ky, 0, 1, 1, c)?;
    Ok(out.squeeze(0)?)
}

/// Fixed-size Gaussian blur whose sigma is drawn uniformly from `sigma`.
#[derive(Debug, Clone)]
pub struct GaussianBlur {
    kernel_size: usize,
    sigma: (f64, f64),
}

impl GaussianBlur {
    pub fn new(kernel_size: usize, sigma: (f64, f64)) -> Self {
        Self { kernel_size, sigma }
    }

    pub fn sample_sigma<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        rng.gen_range(self.sigma.0..=self.sigma.1)
    }

    pub fn forward(&self, image: &Tensor, sigma: f64) -> Result<Tensor> {
        gaussian_blur(image, self.kernel_size, sigma)
    }
}

/// Applies [`GaussianBlur`] when a fresh uniform draw in [0, 1) is strictly below `p`.
///
/// The gate consumes exactly one draw per call; sigma is only drawn once the gate passes.
#[derive(Debug, Clone)]
pub struct RandomGaussianBlur {
    blur: GaussianBlur,
    p: f64,
}

impl RandomGaussianBlur {
    pub fn new(kernel_size: usize, p: f64) -> Self {
        Self {
            blur: GaussianBlur::new(kernel_size, (0.1, 2.0)),
            p,
        }
    }
}

impl RandomTransform for RandomGaussianBlur {
    /// `Some(sigma)` when the blur runs.
    type Params = Option<f64>;

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R, _height: usize, _width: usize) -> Option<f64> {
        let gate: f64 = rng.gen();
        if gate < self.p {
            Some(self.blur.sample_sigma(rng))
        } else {
            None
        }
    }

    fn apply(&self, image: &Tensor, sigma: &Option<f64>) -> Result<Tensor> {
        match sigma {
            Some(sigma) => self.blur.forward(image, *sigma),
            None => Ok(image.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_kernel_is_normalised_and_symmetric() {
        let k = gaussian_kernel1d(23, 1.3);
        assert_eq!(k.len(), 23);
        let sum: f32 = k.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        for i in 0..11 {
            assert!((k[i] - k[22 - i]).abs() < 1e-7);
        }
        assert!(k[11] > k[10]);
    }

    #[test]
    fn test_reflect_indices() {
        assert_eq!(reflect_indices(4, 2), vec![2, 1, 0, 1, 2, 3, 2, 1]);
        assert_eq!(reflect_indices(2, 3), vec![1, 0, 1, 0, 1, 0, 1, 0]);
        assert_eq!(reflect_indices(1, 2), vec![0; 5]);
    }

    #[test]
    fn test_blur_keeps_shape_and_constant_image() -> Result<()> {
        let x = (Tensor::ones((3, 30, 40), DType::F32, &Device::Cpu)? * 0.6)?;
        let y = gaussian_blur(&x, 23, 2.0)?;
        assert_eq!(y.dims(), &[3, 30, 40]);
        let max_dev = (y - 0.6)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(max_dev < 1e-5);
        Ok(())
    }

    #[test]
    fn test_blur_spreads_an_impulse() -> Result<()> {
        let mut data = vec![0f32; 3 * 64 * 64];
        data[32 * 64 + 32] = 1.0;
        let x = Tensor::from_vec(data, (3, 64, 64), &Device::Cpu)?;
        let y = gaussian_blur(&x, 23, 2.0)?;
        let red = y.narrow(0, 0, 1)?;
        let total = red.sum_all()?.to_scalar::<f32>()?;
        assert!((total - 1.0).abs() < 1e-4);
        let v = red.squeeze(0)?.to_vec2::<f32>()?;
        assert!(v[32][32] < 0.1);
        assert!(v[32][33] > 0.0 && (v[32][33] - v[33][32]).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_gate_is_strictly_less_than() {
        let blur = RandomGaussianBlur::new(23, 0.5);
        // StepRng(0, 0) always yields 0.0, which passes the gate
        assert!(blur.sample(&mut StepRng::new(0, 0), 8, 8).is_some());
        // u64::MAX maps to the largest f64 below 1.0
        assert!(blur.sample(&mut StepRng::new(u64::MAX, 0), 8, 8).is_none());
        // p = 0 never passes, even on a 0.0 draw
        let never = RandomGaussianBlur::new(23, 0.0);
        assert!(never.sample(&mut StepRng::new(0, 0), 8, 8).is_none());
    }
}
