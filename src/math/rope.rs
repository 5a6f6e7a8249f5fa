//! Rotary position encoding (RoPE).
//!
//! Angles are precomputed as `angle[pos][i] = pos / base^(2i / dim)` for
//! `i < dim / 2`. Each consecutive pair `(2i, 2i + 1)` is rotated by its angle;
//! an odd trailing element passes through unrotated.

use crate::errors::{BitNetError, Result};
use crate::quantization::saturate_f32;

/// Default RoPE base/theta used by LLaMA-style models.
pub const DEFAULT_ROPE_BASE: f32 = 10_000.0;

/// Precomputed sine/cosine tables, row-major `[max_positions, dim / 2]`.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    dim: usize,
    max_positions: usize,
    half_dim: usize,
    inv_freq: Vec<f32>,
    sin: Vec<f32>,
    cos: Vec<f32>,
}

impl RotaryEmbedding {
    pub fn new(base: f32, max_positions: usize, dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(BitNetError::InvalidConfig(
                "RoPE dimension must be greater than zero".to_string(),
            ));
        }
        if !base.is_finite() || base <= 0.0 {
            return Err(BitNetError::InvalidConfig(format!(
                "RoPE base must be finite and positive, got {base}"
            )));
        }
        let half_dim = dim / 2;
        let inv_freq: Vec<f32> = (0..half_dim)
            .map(|i| 1.0 / base.powf((2 * i) as f32 / dim as f32))
            .collect();

        let table_len = max_positions.checked_mul(half_dim).ok_or_else(|| {
            BitNetError::InvalidConfig(format!("RoPE table {max_positions} x {half_dim} overflows"))
        })?;
        let mut sin: Vec<f32> = Vec::new();
        let mut cos: Vec<f32> = Vec::new();
        for table in [&mut sin, &mut cos] {
            table.try_reserve_exact(table_len).map_err(|e| {
                BitNetError::InvalidConfig(format!("RoPE table of {table_len} entries: {e}"))
            })?;
        }
        for pos in 0..max_positions {
            for &freq in &inv_freq {
                let angle = pos as f32 * freq;
                sin.push(angle.sin());
                cos.push(angle.cos());
            }
        }
        Ok(Self {
            dim,
            max_positions,
            half_dim,
            inv_freq,
            sin,
            cos,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// Rotation angle for pair `i` at `position`.
    pub fn angle(&self, position: usize, i: usize) -> Option<f32> {
        if position >= self.max_positions || i >= self.half_dim {
            return None;
        }
        Some(position as f32 * self.inv_freq[i])
    }

    fn check(&self, len: usize, position: usize) -> Result<()> {
        if position >= self.max_positions {
            return Err(BitNetError::RopePosition {
                position,
                max: self.max_positions,
            });
        }
        if len != self.dim {
            return Err(BitNetError::DimensionMismatch {
                expected: self.dim,
                actual: len,
            });
        }
        Ok(())
    }

    fn rotate<T: Copy>(
        &self,
        v: &mut [T],
        position: usize,
        load: impl Fn(T) -> f32,
        store: impl Fn(f32) -> T,
    ) {
        let row = position * self.half_dim;
        for i in 0..self.half_dim {
            let (s, c) = (self.sin[row + i], self.cos[row + i]);
            let a = load(v[2 * i]);
            let b = load(v[2 * i + 1]);
            v[2 * i] = store(c * a - s * b);
            v[2 * i + 1] = store(s * a + c * b);
        }
    }

    /// Rotate a vector by `position`, returning a new vector.
    pub fn apply(&self, v: &[f32], position: usize) -> Result<Vec<f32>> {
        let mut out = v.to_vec();
        self.apply_in_place(&mut out, position)?;
        Ok(out)
    }

    pub fn apply_in_place(&self, v: &mut [f32], position: usize) -> Result<()> {
        self.check(v.len(), position)?;
        self.rotate(v, position, |x| x, |x| x);
        Ok(())
    }

    /// Rotate consecutive `dim`-sized vectors at positions `offset`, `offset + 1`, ...
    pub fn apply_batch(&self, vectors: &mut [f32], offset: usize) -> Result<()> {
        if vectors.len() % self.dim != 0 {
            return Err(BitNetError::DimensionMismatch {
                expected: self.dim,
                actual: vectors.len() % self.dim,
            });
        }
        for (i, v) in vectors.chunks_mut(self.dim).enumerate() {
            self.apply_in_place(v, offset + i)?;
        }
        Ok(())
    }

    /// Int8 variant of [`RotaryEmbedding::apply_batch`]; rotated values are rounded and saturated.
    pub fn apply_batch_i8(&self, vectors: &mut [i8], offset: usize) -> Result<()> {
        if vectors.len() % self.dim != 0 {
            return Err(BitNetError::DimensionMismatch {
                expected: self.dim,
                actual: vectors.len() % self.dim,
            });
        }
        for (i, v) in vectors.chunks_mut(self.dim).enumerate() {
            self.check(v.len(), offset + i)?;
            self.rotate(v, offset + i, |x| x as f32, saturate_f32);
        }
        Ok(())
    }
}
