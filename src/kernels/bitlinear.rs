//! BitLinear: int8 activations × ternary weights with int32 accumulation.
//!
//! Weights are `[out_features, in_features]`, row-major. Since every weight is
//! -1, 0 or +1 the inner product is a sequence of add / subtract / skip; the
//! accumulator is `i32` and only the final sum is clamped back to int8.

#![allow(clippy::needless_range_loop)]

use rayon::prelude::*;

use crate::errors::{BitNetError, Result};
use crate::parallel::for_each_row_chunk;
use crate::quantization::saturate_i32;
use crate::tensor::Tensor;

/// Dot product of one activation row with one ternary weight row.
#[inline]
pub fn ternary_dot(activations: &[i8], weights: &[i8]) -> i32 {
    debug_assert_eq!(activations.len(), weights.len());
    let mut acc = 0i32;
    let n = activations.len();
    let n4 = n - n % 4;
    let mut j = 0;
    while j < n4 {
        acc += activations[j] as i32 * weights[j] as i32
            + activations[j + 1] as i32 * weights[j + 1] as i32
            + activations[j + 2] as i32 * weights[j + 2] as i32
            + activations[j + 3] as i32 * weights[j + 3] as i32;
        j += 4;
    }
    for k in n4..n {
        acc += activations[k] as i32 * weights[k] as i32;
    }
    acc
}

fn check_operands(activations: &Tensor, weights: &Tensor) -> Result<(usize, usize)> {
    if weights.rank() != 2 {
        return Err(BitNetError::ShapeMismatch(format!(
            "weights must be [out, in], got {:?}",
            weights.shape()
        )));
    }
    let out_features = weights.shape()[0];
    let in_features = weights.shape()[1];
    if activations.rank() < 2 || activations.last_dim() != in_features {
        return Err(BitNetError::ShapeMismatch(format!(
            "activations {:?} do not match weights {:?}",
            activations.shape(),
            weights.shape()
        )));
    }
    Ok((out_features, in_features))
}

/// Output shape: leading activation axes followed by `out_features`.
fn output_shape(activations: &Tensor, out_features: usize) -> Vec<usize> {
    let mut shape = activations.shape().to_vec();
    if let Some(last) = shape.last_mut() {
        *last = out_features;
    }
    shape
}

/// `linear(x[.., in], w[out, in]) -> y[.., out]`, saturated to int8.
pub fn bitlinear(activations: &Tensor, weights: &Tensor) -> Result<Tensor> {
    let (out_features, _) = check_operands(activations, weights)?;
    let mut out = Tensor::zeros(&output_shape(activations, out_features))?;
    bitlinear_into(activations, weights, &mut out)?;
    Ok(out)
}

/// Like [`bitlinear`] but writes into a pre-allocated output tensor.
pub fn bitlinear_into(activations: &Tensor, weights: &Tensor, out: &mut Tensor) -> Result<()> {
    let (out_features, in_features) = check_operands(activations, weights)?;
    let expected = output_shape(activations, out_features);
    if out.shape() != expected.as_slice() {
        return Err(BitNetError::ShapeMismatch(format!(
            "output {:?}, expected {:?}",
            out.shape(),
            expected
        )));
    }

    let input = activations.as_slice();
    let w = weights.as_slice();
    for_each_row_chunk(out.as_mut_slice(), out_features, |first_row, chunk| {
        for (r, out_row) in chunk.chunks_mut(out_features).enumerate() {
            let row = first_row + r;
            let x = &input[row * in_features..(row + 1) * in_features];
            for (o, y) in out_row.iter_mut().enumerate() {
                let w_row = &w[o * in_features..(o + 1) * in_features];
                *y = saturate_i32(ternary_dot(x, w_row));
            }
        }
    });
    Ok(())
}

/// Unsaturated accumulators for a single row, parallel over output features.
///
/// Used for the vocabulary projection, where the sums feed softmax directly.
pub fn bitlinear_accumulate(row: &[i8], weights: &Tensor) -> Result<Vec<i32>> {
    if weights.rank() != 2 || weights.shape()[1] != row.len() {
        return Err(BitNetError::ShapeMismatch(format!(
            "row of {} does not match weights {:?}",
            row.len(),
            weights.shape()
        )));
    }
    let in_features = row.len();
    let w = weights.as_slice();
    let mut out = vec![0i32; weights.shape()[0]];
    out.par_iter_mut().enumerate().for_each(|(o, acc)| {
        *acc = ternary_dot(row, &w[o * in_features..(o + 1) * in_features]);
    });
    Ok(out)
}
