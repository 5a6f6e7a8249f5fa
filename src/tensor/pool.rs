//! Shape-keyed pool of int8 tensors to cut allocation in the forward pass.
//!
//! Tensors are checked out as [`PooledTensor`] guards and go back to the pool
//! when the guard drops, so intermediates are returned on every exit path.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use super::Tensor;
use crate::errors::Result;

/// Maximum number of free tensors kept per shape.
const MAX_PER_SHAPE: usize = 8;

/// Tensors smaller than this are not worth pooling.
const MIN_POOL_ELEMENTS: usize = 64;

#[derive(Debug, Default)]
pub struct TensorPool {
    free: Mutex<HashMap<Vec<usize>, Vec<Tensor>>>,
}

impl TensorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a zero-filled tensor of `shape`, reusing a pooled buffer when one is free.
    pub fn checkout(&self, shape: &[usize]) -> Result<PooledTensor<'_>> {
        let reused = self
            .free
            .lock()
            .ok()
            .and_then(|mut free| free.get_mut(shape).and_then(Vec::pop));
        let tensor = match reused {
            Some(mut t) => {
                t.reset();
                t
            }
            None => Tensor::zeros(shape)?,
        };
        Ok(PooledTensor {
            tensor: Some(tensor),
            pool: self,
        })
    }

    /// Return a tensor for reuse. Small tensors and overflow beyond the per-shape cap are dropped.
    pub fn recycle(&self, tensor: Tensor) {
        if tensor.numel() < MIN_POOL_ELEMENTS {
            return;
        }
        if let Ok(mut free) = self.free.lock() {
            let bucket = free.entry(tensor.shape().to_vec()).or_default();
            if bucket.len() < MAX_PER_SHAPE {
                bucket.push(tensor);
            }
        }
    }

    /// Number of free tensors currently held for `shape`.
    pub fn available(&self, shape: &[usize]) -> usize {
        self.free
            .lock()
            .map(|free| free.get(shape).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        if let Ok(mut free) = self.free.lock() {
            free.clear();
        }
    }
}

/// Guard that returns its tensor to the pool when dropped.
pub struct PooledTensor<'a> {
    tensor: Option<Tensor>,
    pool: &'a TensorPool,
}

impl PooledTensor<'_> {
    /// Keep the tensor instead of returning it to the pool.
    pub fn detach(mut self) -> Tensor {
        self.tensor.take().expect("tensor already detached")
    }
}

impl Deref for PooledTensor<'_> {
    type Target = Tensor;

    fn deref(&self) -> &Tensor {
        self.tensor.as_ref().expect("tensor already detached")
    }
}

impl DerefMut for PooledTensor<'_> {
    fn deref_mut(&mut self) -> &mut Tensor {
        self.tensor.as_mut().expect("tensor already detached")
    }
}

impl Drop for PooledTensor<'_> {
    fn drop(&mut self) {
        if let Some(t) = self.tensor.take() {
            self.pool.recycle(t);
        }
    }
}
