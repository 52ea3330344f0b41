//! Error types shared by the model, its losses and the augmentation pipeline.

use thiserror::Error;

/// Failures surfaced by this crate. Nothing here is retried or recovered;
/// every variant propagates to the caller.
#[derive(Debug, Error)]
pub enum VicRegError {
    /// Two tensors that must agree in shape do not.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// A tensor has the wrong number of dimensions.
    #[error("{what}: expected rank {expected}, got rank {got}")]
    InvalidRank {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// A loss was asked to reduce over zero samples.
    #[error("empty batch")]
    EmptyBatch,

    /// The batch is too small for an unbiased statistic.
    #[error("degenerate batch: {batch_size} rows, need at least {min}")]
    DegenerateBatch { batch_size: usize, min: usize },

    /// An image with zero width or height cannot be cropped into a view.
    #[error("image has zero width or height ({width}x{height})")]
    EmptyImage { width: usize, height: usize },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, VicRegError>;
