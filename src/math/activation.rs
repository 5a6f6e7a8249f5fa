//! Squared ReLU for the BitNet feed-forward block.

use crate::quantization::saturate_i32;

/// Fixed down-scale applied after squaring so results stay near int8 range.
pub const RELU2_DOWNSCALE: i32 = 16;

/// `max(0, x)²`.
#[inline]
pub fn relu_squared(x: i32) -> i32 {
    let r = x.max(0);
    r * r
}

/// Squared ReLU on an int8 activation: `max(0, x)² / 16`, saturated.
#[inline]
pub fn relu_squared_i8(x: i8) -> i8 {
    saturate_i32(relu_squared(x as i32) / RELU2_DOWNSCALE)
}
