//! The three VICReg regularizers over `[batch, dim]` embedding batches.
//!
//! Every function returns a 0-dim tensor so the result stays on the autograd graph.

use candle_core::{DType, Tensor};

use crate::error::{Result, VicRegError};

fn batch_dims(embeddings: &Tensor) -> Result<(usize, usize)> {
    let dims = embeddings.dims();
    if dims.len() != 2 {
        return Err(VicRegError::InvalidRank {
            what: "embeddings",
            expected: 2,
            got: dims.len(),
        });
    }
    if dims[0] == 0 {
        return Err(VicRegError::EmptyBatch);
    }
    Ok((dims[0], dims[1]))
}

fn centered(embeddings: &Tensor) -> Result<Tensor> {
    let mean = embeddings.mean_keepdim(0)?;
    Ok(embeddings.broadcast_sub(&mean)?)
}

/// `[dim, dim]` ones with a zero diagonal, matching `like` in dtype and device.
fn off_diagonal_mask(dim: usize, like: &Tensor) -> Result<Tensor> {
    let mask: Vec<f32> = (0..dim * dim)
        .map(|i| if i / dim == i % dim { 0.0 } else { 1.0 })
        .collect();
    Ok(Tensor::from_vec(mask, (dim, dim), like.device())?.to_dtype(like.dtype())?)
}

/// Hinge on the per-dimension standard deviation: `mean_d max(0, gamma - sqrt(var_d + eps))`.
///
/// `var_d` is the population variance across the batch. A single-row batch has zero
/// variance everywhere and yields `gamma - sqrt(eps)`, the near-maximal value.
pub fn variance_loss(embeddings: &Tensor, gamma: f64, eps: f64) -> Result<Tensor> {
    let (batch, _) = batch_dims(embeddings)?;
    if batch < 2 {
        tracing::warn!(batch, "variance loss on a single-row batch is degenerate");
    }
    let var = centered(embeddings)?.sqr()?.mean(0)?;
    let std = (var + eps)?.sqrt()?;
    // gamma - std, floored at zero
    let hinge = std.affine(-1.0, gamma)?.relu()?;
    Ok(hinge.mean_all()?)
}

/// Element-wise mean squared error between the two branches' embeddings.
pub fn invariance_loss(top_embeddings: &Tensor, bottom_embeddings: &Tensor) -> Result<Tensor> {
    if top_embeddings.dims() != bottom_embeddings.dims() {
        return Err(VicRegError::ShapeMismatch {
            expected: top_embeddings.dims().to_vec(),
            got: bottom_embeddings.dims().to_vec(),
        });
    }
    batch_dims(top_embeddings)?;
    Ok(candle_nn::loss::mse(top_embeddings, bottom_embeddings)?)
}

/// Sum of squared off-diagonal entries of the batch covariance matrix, divided by `dim`.
///
/// This is reconstructed from the VICReg paper: centre each dimension, form
/// `Zc^T Zc / (N - 1)`, then zero the diagonal before summing squares.
pub fn covariance_loss(embeddings: &Tensor) -> Result<Tensor> {
    let (batch, dim) = batch_dims(embeddings)?;
    if batch < 2 {
        return Err(VicRegError::DegenerateBatch {
            batch_size: batch,
            min: 2,
        });
    }
    let zc = centered(embeddings)?;
    let cov = (zc.t()?.contiguous()?.matmul(&zc)? / (batch - 1) as f64)?;
    let off_diag = cov.mul(&off_diagonal_mask(dim, embeddings)?)?;
    Ok((off_diag.sqr()?.sum_all()? / dim as f64)?)
}

/// Reads a 0-dim loss back to the host.
pub fn scalar(loss: &Tensor) -> Result<f32> {
    Ok(loss.to_dtype(DType::F32)?.to_scalar::<f32>()?)
}
