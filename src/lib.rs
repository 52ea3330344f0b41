//! VICReg (Variance-Invariance-Covariance Regularization) on candle.
//!
//! Two independent pieces:
//! - [`augment`]: the stochastic pipeline turning one image into one normalized 3x224x224 view.
//! - [`model`]: the dual-branch encoder/expander model and its three regularizers.

pub mod augment;
pub mod config;
pub mod error;
pub mod model;

pub use augment::{AugmentationPipeline, ViewParams};
pub use error::{Result, VicRegError};
pub use model::{LossWeights, VicReg, VicRegLoss};
