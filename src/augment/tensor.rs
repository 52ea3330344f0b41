//! Conversions between decoded images and channel-first float tensors.

use candle_core::{DType, Device, Tensor};
use image::{DynamicImage, RgbImage};
use std::path::Path;

use crate::error::{Result, VicRegError};

/// Decode an image file from disk.
pub fn load_image(path: impl AsRef<Path>) -> Result<DynamicImage> {
    Ok(image::open(path)?)
}

/// `[3, H, W]` f32 tensor with values in [0, 1]; alpha is dropped, grayscale is expanded to RGB.
pub fn image_to_tensor(image: &DynamicImage, device: &Device) -> Result<Tensor> {
    let rgb = image.to_rgb8();
    let (w, h) = (rgb.width() as usize, rgb.height() as usize);
    if w == 0 || h == 0 {
        return Err(VicRegError::EmptyImage {
            width: w,
            height: h,
        });
    }
    let raw = rgb.as_raw();
    let plane = h * w;
    let mut chw = vec![0f32; 3 * plane];
    for (i, px) in raw.chunks_exact(3).enumerate() {
        chw[i] = px[0] as f32 / 255.0;
        chw[plane + i] = px[1] as f32 / 255.0;
        chw[2 * plane + i] = px[2] as f32 / 255.0;
    }
    Ok(Tensor::from_vec(chw, (3, h, w), device)?)
}

/// Quantises a `[3, H, W]` tensor in [0, 1] back to 8-bit RGB. Values are clamped first.
pub fn tensor_to_image(image: &Tensor) -> Result<RgbImage> {
    let (c, h, w) = image.dims3()?;
    if c != 3 {
        return Err(VicRegError::ShapeMismatch {
            expected: vec![3, h, w],
            got: image.dims().to_vec(),
        });
    }
    let planes = image
        .clamp(0.0, 1.0)?
        .to_dtype(DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    let plane = h * w;
    let mut raw = Vec::with_capacity(3 * plane);
    for i in 0..plane {
        for ch in 0..3 {
            raw.push((planes[ch * plane + i] * 255.0).round() as u8);
        }
    }
    // buffer length is exactly 3 * w * h
    RgbImage::from_raw(w as u32, h as u32, raw).ok_or(VicRegError::EmptyImage {
        width: w,
        height: h,
    })
}

/// Per-channel `(x - mean) / std` over a `[3, H, W]` tensor.
pub struct Normalize {
    mean: Tensor,
    std: Tensor,
}

impl Normalize {
    pub fn new(mean: [f32; 3], std: [f32; 3], device: &Device) -> Result<Self> {
        Ok(Self {
            mean: Tensor::from_vec(mean.to_vec(), (3, 1, 1), device)?,
            std: Tensor::from_vec(std.to_vec(), (3, 1, 1), device)?,
        })
    }

    pub fn forward(&self, image: &Tensor) -> Result<Tensor> {
        Ok(image.broadcast_sub(&self.mean)?.broadcast_div(&self.std)?)
    }

    /// `x * std + mean`
    pub fn inverse(&self, image: &Tensor) -> Result<Tensor> {
        Ok(image.broadcast_mul(&self.std)?.broadcast_add(&self.mean)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_to_tensor_is_channel_first() -> Result<()> {
        let img = RgbImage::from_fn(3, 2, |x, y| image::Rgb([255, (x * 100) as u8, (y * 50) as u8]));
        let t = image_to_tensor(&DynamicImage::ImageRgb8(img), &Device::Cpu)?;
        assert_eq!(t.dims(), &[3, 2, 3]);
        let v = t.to_vec3::<f32>()?;
        assert_eq!(v[0][1][2], 1.0);
        assert!((v[1][0][2] - 200.0 / 255.0).abs() < 1e-6);
        assert!((v[2][1][0] - 50.0 / 255.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let img = DynamicImage::new_rgb8(0, 4);
        assert!(matches!(
            image_to_tensor(&img, &Device::Cpu),
            Err(VicRegError::EmptyImage { width: 0, height: 4 })
        ));
    }

    #[test]
    fn test_normalize_inverse_round_trip() -> Result<()> {
        let device = Device::Cpu;
        let norm = Normalize::new([0.485, 0.456, 0.406], [0.229, 0.224, 0.225], &device)?;
        let x = Tensor::rand(0f32, 1f32, (3, 4, 5), &device)?;

        let z = norm.forward(&x)?;
        let red = z.narrow(0, 0, 1)?.flatten_all()?.to_vec1::<f32>()?;
        let raw = x.narrow(0, 0, 1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!((red[0] - (raw[0] - 0.485) / 0.229).abs() < 1e-5);

        let back = norm.inverse(&z)?;
        let diff = (back - &x)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-5);
        Ok(())
    }

    #[test]
    fn test_tensor_to_image_quantises() -> Result<()> {
        let img = RgbImage::from_fn(4, 3, |x, y| image::Rgb([(x * 60) as u8, (y * 90) as u8, 17]));
        let t = image_to_tensor(&DynamicImage::ImageRgb8(img.clone()), &Device::Cpu)?;
        assert_eq!(tensor_to_image(&t)?, img);
        Ok(())
    }
}
