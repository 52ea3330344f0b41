use candle_core::{Module, Tensor};
use candle_nn::{self as nn, VarBuilder};

use crate::error::Result;

/// Expander: maps an encoder representation to the embedding space the losses act on.
/// Three linear layers; the first two are followed by LayerNorm + ReLU.
pub struct Expander {
    fc1: nn::Linear,
    ln1: nn::LayerNorm,
    fc2: nn::Linear,
    ln2: nn::LayerNorm,
    fc3: nn::Linear,
}

impl Expander {
    pub fn new(vb: VarBuilder<'_>, in_dim: usize, hidden_dim: usize, out_dim: usize) -> Result<Self> {
        let fc1 = nn::linear(in_dim, hidden_dim, vb.pp("fc1"))?;
        let ln1 = nn::layer_norm(hidden_dim, 1e-5, vb.pp("ln1"))?;
        let fc2 = nn::linear(hidden_dim, hidden_dim, vb.pp("fc2"))?;
        let ln2 = nn::layer_norm(hidden_dim, 1e-5, vb.pp("ln2"))?;
        let fc3 = nn::linear(hidden_dim, out_dim, vb.pp("fc3"))?;
        Ok(Self {
            fc1,
            ln1,
            fc2,
            ln2,
            fc3,
        })
    }
}

impl Module for Expander {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let h = self.ln1.forward(&self.fc1.forward(xs)?)?.relu()?;
        let h = self.ln2.forward(&self.fc2.forward(&h)?)?.relu()?;
        self.fc3.forward(&h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_expands_to_embedding_dim() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let expander = Expander::new(vb, 8, 32, 64)?;

        let x = Tensor::randn(0f32, 1f32, (5, 8), &device)?;
        assert_eq!(expander.forward(&x)?.dims(), &[5, 64]);

        let wrong = Tensor::randn(0f32, 1f32, (5, 7), &device)?;
        assert!(expander.forward(&wrong).is_err());
        Ok(())
    }
}
