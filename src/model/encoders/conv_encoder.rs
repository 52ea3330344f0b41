use candle_core::{Module, Tensor};
use candle_nn::{self as nn, Conv2dConfig, VarBuilder};

use crate::config::BackboneConfig;
use crate::error::Result;

/// Small convolutional encoder: `[B, 3, H, W]` views to `[B, channels]` representations.
///
/// Each conv halves the spatial size; global average pooling makes the output
/// independent of the input resolution.
pub struct ConvEncoder {
    stem: nn::Conv2d,
    blocks: Vec<nn::Conv2d>,
    ln_final: nn::LayerNorm,
    out_dim: usize,
}

impl ConvEncoder {
    pub fn new(vb: VarBuilder<'_>, cfg: &BackboneConfig) -> Result<Self> {
        let strided = Conv2dConfig {
            padding: 1,
            stride: 2,
            ..Default::default()
        };
        let stem = nn::conv2d(3, cfg.channels, 3, strided, vb.pp("stem"))?;

        let mut blocks = Vec::with_capacity(cfg.num_blocks);
        for i in 0..cfg.num_blocks {
            let block = nn::conv2d(
                cfg.channels,
                cfg.channels,
                3,
                strided,
                vb.pp(format!("block_{}", i)),
            )?;
            blocks.push(block);
        }

        let ln_final = nn::layer_norm(cfg.channels, 1e-5, vb.pp("ln_final"))?;
        Ok(Self {
            stem,
            blocks,
            ln_final,
            out_dim: cfg.channels,
        })
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }
}

impl Module for ConvEncoder {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        // fails fast on anything that is not a batch of images
        let (_, channels, _, _) = xs.dims4()?;
        if channels != 3 {
            candle_core::bail!("conv encoder expects 3 input channels, got {channels}");
        }
        let mut h = self.stem.forward(xs)?.relu()?;
        for block in &self.blocks {
            h = block.forward(&h)?.relu()?;
        }
        let pooled = h.flatten_from(2)?.mean(2)?;
        self.ln_final.forward(&pooled)
    }
}
