//! Saturating conversions into the int8 activation domain.
//!
//! Every value written into a [`Tensor`] goes through one of these helpers, so
//! out-of-range results clamp to `[-128, 127]` instead of wrapping.

use crate::errors::{BitNetError, Result};
use crate::tensor::Tensor;

/// Clamp a wide integer accumulator into int8.
#[inline]
pub fn saturate_i32(value: i32) -> i8 {
    value.clamp(i8::MIN as i32, i8::MAX as i32) as i8
}

/// Round to nearest (half away from zero) and clamp into int8. NaN maps to 0.
#[inline]
pub fn saturate_f32(value: f32) -> i8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(i8::MIN as f32, i8::MAX as f32) as i8
}

/// Element-wise saturating residual connection: `input + sublayer_out`.
pub fn residual_add(input: &Tensor, sublayer_out: &Tensor) -> Result<Tensor> {
    if input.shape() != sublayer_out.shape() {
        return Err(BitNetError::ShapeMismatch(format!(
            "residual operands {:?} and {:?}",
            input.shape(),
            sublayer_out.shape()
        )));
    }
    let data = input
        .as_slice()
        .iter()
        .zip(sublayer_out.as_slice())
        .map(|(&a, &b)| a.saturating_add(b))
        .collect();
    Tensor::from_vec(input.shape(), data)
}

/// In-place variant: `acc[i] = acc[i] + other[i]` with saturation.
pub(crate) fn residual_add_into(acc: &mut [i8], other: &[i8]) {
    for (a, &b) in acc.iter_mut().zip(other) {
        *a = a.saturating_add(b);
    }
}
