//! Ternary weight codes for 1.58-bit quantization.
//!
//! Weights are stored on disk 4 per byte, 2 bits each, LSB first
//! (value `i` of a byte sits in bits `2i..2i+2`):
//! - 00 = MinusOne
//! - 01 = Zero
//! - 10 = PlusOne
//! - 11 = reserved (rejected)

use std::fmt;

use crate::errors::{BitNetError, Result};
use crate::tensor::Tensor;

/// Ternary weight value: -1, 0, or +1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TernaryWeight {
    /// Weight value -1
    MinusOne,
    /// Weight value 0
    Zero,
    /// Weight value +1
    PlusOne,
}

impl TernaryWeight {
    #[inline]
    pub fn to_i8(self) -> i8 {
        match self {
            TernaryWeight::MinusOne => -1,
            TernaryWeight::Zero => 0,
            TernaryWeight::PlusOne => 1,
        }
    }

    /// Fails for anything outside {-1, 0, 1}.
    #[inline]
    pub fn from_i8(value: i8) -> Result<Self> {
        match value {
            -1 => Ok(TernaryWeight::MinusOne),
            0 => Ok(TernaryWeight::Zero),
            1 => Ok(TernaryWeight::PlusOne),
            other => Err(BitNetError::InvalidWeightsFormat(format!(
                "value {other} is not ternary"
            ))),
        }
    }

    /// Encode to 2-bit pattern for packing.
    #[inline]
    pub fn to_bits(self) -> u8 {
        match self {
            TernaryWeight::MinusOne => 0b00,
            TernaryWeight::Zero => 0b01,
            TernaryWeight::PlusOne => 0b10,
        }
    }

    /// Decode from 2-bit pattern. 0b11 is reserved and rejected.
    #[inline]
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits & 0b11 {
            0b00 => Ok(TernaryWeight::MinusOne),
            0b01 => Ok(TernaryWeight::Zero),
            0b10 => Ok(TernaryWeight::PlusOne),
            _ => Err(BitNetError::InvalidWeightsFormat(
                "reserved ternary code 0b11".to_string(),
            )),
        }
    }
}

impl fmt::Display for TernaryWeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_i8())
    }
}

/// Bytes needed to pack `count` ternary values.
#[inline]
pub fn packed_len(count: usize) -> usize {
    count.div_ceil(4)
}

/// Pack ternary values 4 per byte. Padding slots in the last byte encode Zero.
pub fn pack_ternary(values: &[i8]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; packed_len(values.len())];
    for (byte, chunk) in out.iter_mut().zip(values.chunks(4)) {
        let mut b = 0u8;
        for pos in 0..4 {
            let w = match chunk.get(pos) {
                Some(&v) => TernaryWeight::from_i8(v)?,
                None => TernaryWeight::Zero,
            };
            b |= w.to_bits() << (pos * 2);
        }
        *byte = b;
    }
    Ok(out)
}

/// Unpack `count` ternary values from a packed byte buffer.
pub fn unpack_ternary(bytes: &[u8], count: usize) -> Result<Vec<i8>> {
    let needed = packed_len(count);
    if bytes.len() < needed {
        return Err(BitNetError::InvalidWeightsFormat(format!(
            "need {needed} packed bytes for {count} weights, got {}",
            bytes.len()
        )));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let bits = (bytes[i / 4] >> ((i % 4) * 2)) & 0b11;
        out.push(TernaryWeight::from_bits(bits)?.to_i8());
    }
    Ok(out)
}

/// Unpack straight into a ternary weight tensor of `shape`.
pub fn unpack_ternary_tensor(bytes: &[u8], shape: &[usize]) -> Result<Tensor> {
    let count = shape.iter().product();
    Tensor::from_vec(shape, unpack_ternary(bytes, count)?)
}
