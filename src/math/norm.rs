//! SubLN: per-token mean/variance normalization with a learned scale and no bias.

use crate::errors::{BitNetError, Result};
use crate::parallel::for_each_row_chunk;
use crate::quantization::saturate_f32;
use crate::tensor::Tensor;

/// Epsilon used at every normalization site.
pub const NORM_EPS: f32 = 1e-5;

#[inline]
fn normalize_into<I>(values: I, n: usize, gamma: &[f32], eps: f32, mut emit: impl FnMut(usize, f32))
where
    I: Iterator<Item = f32> + Clone,
{
    let mean = values.clone().sum::<f32>() / n as f32;
    let variance = values.clone().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n as f32;
    let inv_std = (variance + eps).sqrt().recip();
    for (i, v) in values.enumerate() {
        emit(i, (v - mean) * inv_std * gamma[i]);
    }
}

/// Normalize one row in floating point.
pub fn normalize_row(x: &[f32], gamma: &[f32], eps: f32) -> Result<Vec<f32>> {
    if x.len() != gamma.len() {
        return Err(BitNetError::DimensionMismatch {
            expected: gamma.len(),
            actual: x.len(),
        });
    }
    if x.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = vec![0.0f32; x.len()];
    normalize_into(x.iter().copied(), x.len(), gamma, eps, |i, v| out[i] = v);
    Ok(out)
}

/// Normalize every last-axis slice of `x`, saturating the result to int8.
pub fn layer_norm(x: &Tensor, gamma: &[f32], eps: f32) -> Result<Tensor> {
    let mut out = Tensor::zeros(x.shape())?;
    layer_norm_into(x, gamma, eps, &mut out)?;
    Ok(out)
}

/// Like [`layer_norm`] but writes into `out`, which must have the shape of `x`.
pub fn layer_norm_into(x: &Tensor, gamma: &[f32], eps: f32, out: &mut Tensor) -> Result<()> {
    let d = x.last_dim();
    if d != gamma.len() {
        return Err(BitNetError::DimensionMismatch {
            expected: gamma.len(),
            actual: d,
        });
    }
    if out.shape() != x.shape() {
        return Err(BitNetError::ShapeMismatch(format!(
            "norm output {:?} for input {:?}",
            out.shape(),
            x.shape()
        )));
    }
    let input = x.as_slice();
    for_each_row_chunk(out.as_mut_slice(), d, |first_row, chunk| {
        for (r, out_row) in chunk.chunks_mut(d).enumerate() {
            let row = &input[(first_row + r) * d..(first_row + r + 1) * d];
            normalize_into(row.iter().map(|&v| v as f32), d, gamma, eps, |i, v| {
                out_row[i] = saturate_f32(v)
            });
        }
    });
    Ok(())
}
