//! Dense int8 tensor: a flat `i8` buffer plus an ordered shape.
//!
//! Invariant: `data.len() == shape.iter().product()` at all times. Reshapes only
//! repartition the same buffer. Dropping (or [`Tensor::release`]-ing) a tensor
//! frees its buffer; since `release` consumes `self`, use-after-release cannot
//! compile.

pub mod pool;

pub use pool::{PooledTensor, TensorPool};

use crate::errors::{BitNetError, Result};
use crate::quantization::saturate_i32;

/// Highest rank any component of the forward pass needs (`[batch, heads, seq, head_dim]`).
pub const MAX_RANK: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<i8>,
}

fn check_rank(shape: &[usize]) -> Result<()> {
    if shape.is_empty() || shape.len() > MAX_RANK {
        return Err(BitNetError::InvalidRank(shape.len()));
    }
    Ok(())
}

impl Tensor {
    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: &[usize]) -> Result<Self> {
        check_rank(shape)?;
        let numel = shape.iter().product();
        Ok(Self {
            shape: shape.to_vec(),
            data: vec![0i8; numel],
        })
    }

    /// Wrap an existing buffer. Fails with `Shape` if the length does not match.
    pub fn from_vec(shape: &[usize], data: Vec<i8>) -> Result<Self> {
        check_rank(shape)?;
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(BitNetError::Shape {
                shape: shape.to_vec(),
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    #[inline]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Size of the last axis.
    #[inline]
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Number of last-axis slices ("rows") when all leading axes are flattened.
    #[inline]
    pub fn rows(&self) -> usize {
        match self.last_dim() {
            0 => 0,
            d => self.numel() / d,
        }
    }

    fn offset(&self, indices: &[usize]) -> Result<usize> {
        if indices.len() != self.shape.len() {
            return Err(BitNetError::IndexOutOfBounds {
                index: indices.to_vec(),
                shape: self.shape.clone(),
            });
        }
        let mut offset = 0usize;
        for (&idx, &dim) in indices.iter().zip(&self.shape) {
            if idx >= dim {
                return Err(BitNetError::IndexOutOfBounds {
                    index: indices.to_vec(),
                    shape: self.shape.clone(),
                });
            }
            offset = offset * dim + idx;
        }
        Ok(offset)
    }

    /// Element at `indices` (one index per axis).
    pub fn get(&self, indices: &[usize]) -> Result<i8> {
        let offset = self.offset(indices)?;
        Ok(self.data[offset])
    }

    /// Store `value` at `indices`.
    pub fn set(&mut self, value: i8, indices: &[usize]) -> Result<()> {
        let offset = self.offset(indices)?;
        self.data[offset] = value;
        Ok(())
    }

    /// Store a wide value at `indices`, clamped into int8.
    pub fn set_saturating(&mut self, value: i32, indices: &[usize]) -> Result<()> {
        self.set(saturate_i32(value), indices)
    }

    /// Repartition the buffer under a new shape with the same element count.
    pub fn reshape(&mut self, new_shape: &[usize]) -> Result<()> {
        check_rank(new_shape)?;
        let expected: usize = new_shape.iter().product();
        if expected != self.data.len() {
            return Err(BitNetError::Shape {
                shape: new_shape.to_vec(),
                expected,
                actual: self.data.len(),
            });
        }
        self.shape = new_shape.to_vec();
        Ok(())
    }

    /// Owned variant of [`Tensor::reshape`].
    pub fn reshaped(mut self, new_shape: &[usize]) -> Result<Self> {
        self.reshape(new_shape)?;
        Ok(self)
    }

    /// Raw buffer for bulk reads.
    #[inline]
    pub fn as_slice(&self) -> &[i8] {
        &self.data
    }

    /// Raw buffer for bulk writes.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [i8] {
        &mut self.data
    }

    /// Last-axis slice `row` of the flattened `[rows, last_dim]` view.
    pub fn row(&self, row: usize) -> Result<&[i8]> {
        if row >= self.rows() {
            return Err(BitNetError::IndexOutOfBounds {
                index: vec![row],
                shape: self.shape.clone(),
            });
        }
        let d = self.last_dim();
        Ok(&self.data[row * d..(row + 1) * d])
    }

    /// True when every element is in {-1, 0, 1}.
    pub fn is_ternary(&self) -> bool {
        self.data.iter().all(|&v| (-1..=1).contains(&v))
    }

    /// Consume the tensor and hand back its buffer.
    pub fn into_vec(self) -> Vec<i8> {
        self.data
    }

    /// Release the tensor's storage. Consuming `self` makes later use a compile error.
    pub fn release(self) {
        drop(self);
    }

    /// Zero the buffer for reuse from a pool.
    pub(crate) fn reset(&mut self) {
        self.data.fill(0);
    }
}
