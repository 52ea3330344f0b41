use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use super::encoders::ConvEncoder;
use super::expander::Expander;
use super::loss::{self, scalar};
use crate::config::BackboneConfig;
use crate::error::{Result, VicRegError};

/// Relative weights of the three terms in [`VicReg::loss`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub invariance: f64,
    pub variance: f64,
    pub covariance: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            invariance: 25.0,
            variance: 25.0,
            covariance: 1.0,
        }
    }
}

/// The three terms and their weighted sum, all 0-dim tensors on the autograd graph.
pub struct VicRegLoss {
    pub invariance: Tensor,
    pub variance: Tensor,
    pub covariance: Tensor,
    pub total: Tensor,
}

/// Host-side copy of a [`VicRegLoss`] for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSummary {
    pub invariance: f32,
    pub variance: f32,
    pub covariance: f32,
    pub total: f32,
}

impl VicRegLoss {
    pub fn to_summary(&self) -> Result<LossSummary> {
        Ok(LossSummary {
            invariance: scalar(&self.invariance)?,
            variance: scalar(&self.variance)?,
            covariance: scalar(&self.covariance)?,
            total: scalar(&self.total)?,
        })
    }
}

/// Dual-branch VICReg model.
///
/// Top and bottom branches share a structure (`E` then `X`) but own separate
/// parameters; nothing crosses between them in [`VicReg::forward`].
pub struct VicReg<E, X> {
    top_encoder: E,
    top_expander: X,
    bottom_encoder: E,
    bottom_expander: X,
    gamma: f64,
    eps: f64,
    weights: LossWeights,
}

impl<E: Module, X: Module> VicReg<E, X> {
    pub const DEFAULT_GAMMA: f64 = 1.0;
    pub const EPS: f64 = 1e-5;

    pub fn new(
        top_encoder: E,
        top_expander: X,
        bottom_encoder: E,
        bottom_expander: X,
        gamma: f64,
    ) -> Self {
        Self {
            top_encoder,
            top_expander,
            bottom_encoder,
            bottom_expander,
            gamma,
            eps: Self::EPS,
            weights: LossWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: LossWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn weights(&self) -> LossWeights {
        self.weights
    }

    /// Embeds both view batches: `top_expander(top_encoder(top_data))` and the same on the bottom branch.
    pub fn forward(&self, top_data: &Tensor, bottom_data: &Tensor) -> Result<(Tensor, Tensor)> {
        let top_representations = self.top_encoder.forward(top_data)?;
        let bottom_representations = self.bottom_encoder.forward(bottom_data)?;
        let top_embeddings = self.top_expander.forward(&top_representations)?;
        let bottom_embeddings = self.bottom_expander.forward(&bottom_representations)?;
        if top_embeddings.dims() != bottom_embeddings.dims() {
            return Err(VicRegError::ShapeMismatch {
                expected: top_embeddings.dims().to_vec(),
                got: bottom_embeddings.dims().to_vec(),
            });
        }
        Ok((top_embeddings, bottom_embeddings))
    }

    /// Forces embedding vectors within a batch apart along every dimension.
    pub fn variance_loss(&self, embeddings: &Tensor) -> Result<Tensor> {
        loss::variance_loss(embeddings, self.gamma, self.eps)
    }

    /// Mean squared distance between the two branches' embeddings.
    pub fn invariance_loss(&self, top_embeddings: &Tensor, bottom_embeddings: &Tensor) -> Result<Tensor> {
        loss::invariance_loss(top_embeddings, bottom_embeddings)
    }

    /// Decorrelates embedding dimensions to prevent informational collapse.
    pub fn covariance_loss(&self, embeddings: &Tensor) -> Result<Tensor> {
        loss::covariance_loss(embeddings)
    }

    /// Weighted objective: `λ·inv + μ·(var(top) + var(bottom)) + ν·(cov(top) + cov(bottom))`.
    pub fn loss(&self, top_embeddings: &Tensor, bottom_embeddings: &Tensor) -> Result<VicRegLoss> {
        let invariance = self.invariance_loss(top_embeddings, bottom_embeddings)?;
        let variance = (self.variance_loss(top_embeddings)? + self.variance_loss(bottom_embeddings)?)?;
        let covariance =
            (self.covariance_loss(top_embeddings)? + self.covariance_loss(bottom_embeddings)?)?;

        let total = ((invariance.affine(self.weights.invariance, 0.0)?
            + variance.affine(self.weights.variance, 0.0)?)?
            + covariance.affine(self.weights.covariance, 0.0)?)?;
        Ok(VicRegLoss {
            invariance,
            variance,
            covariance,
            total,
        })
    }
}

/// Builds one encoder/expander branch under `vb`.
pub fn build_branch(vb: VarBuilder<'_>, cfg: &BackboneConfig) -> Result<(ConvEncoder, Expander)> {
    let encoder = ConvEncoder::new(vb.pp("encoder"), cfg)?;
    let expander = Expander::new(vb.pp("expander"), encoder.out_dim(), cfg.hidden_dim, cfg.embed_dim)?;
    Ok((encoder, expander))
}

impl VicReg<ConvEncoder, Expander> {
    /// Reference model: two independently initialised [`ConvEncoder`] + [`Expander`] branches.
    pub fn reference(vb: VarBuilder<'_>, cfg: &BackboneConfig, gamma: f64) -> Result<Self> {
        let (top_encoder, top_expander) = build_branch(vb.pp("top"), cfg)?;
        let (bottom_encoder, bottom_expander) = build_branch(vb.pp("bottom"), cfg)?;
        Ok(Self::new(
            top_encoder,
            top_expander,
            bottom_encoder,
            bottom_expander,
            gamma,
        ))
    }
}
