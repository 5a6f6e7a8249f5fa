//! Q/K/V projection with grouped-query expansion.
//!
//! Three BitLinear projections over the flattened `[batch * seq, hidden]`
//! view, scattered into `[batch, heads, seq, head_dim]`. When there are fewer
//! key/value heads than query heads, query head `h` reads key/value head
//! `h % num_kv_heads`.

use std::sync::Arc;

use crate::errors::{BitNetError, Result};
use crate::kernels::bitlinear_into;
use crate::math::RotaryEmbedding;
use crate::model::config::validate_heads;
use crate::parallel::for_each_row_chunk;
use crate::tensor::{PooledTensor, Tensor, TensorPool};

/// Key/value head that query head `head` reads from.
#[inline]
pub fn kv_head_for(head: usize, num_kv_heads: usize) -> usize {
    head % num_kv_heads
}

/// Scatter a `[batch, seq, src_heads * head_dim]` buffer into `[batch, dst_heads, seq, head_dim]`.
///
/// Destination head `h` copies source head `kv_head_for(h, src_heads)`.
fn scatter_heads(
    src: &[i8],
    batch: usize,
    seq: usize,
    src_heads: usize,
    head_dim: usize,
    out: &mut Tensor,
) {
    let dst_heads = out.shape()[1];
    let src_row = src_heads * head_dim;
    for_each_row_chunk(out.as_mut_slice(), seq * head_dim, |first, chunk| {
        for (i, slab) in chunk.chunks_mut(seq * head_dim).enumerate() {
            let idx = first + i;
            let (b, h) = (idx / dst_heads, idx % dst_heads);
            let sh = kv_head_for(h, src_heads);
            for s in 0..seq {
                let from = (b * seq + s) * src_row + sh * head_dim;
                slab[s * head_dim..(s + 1) * head_dim]
                    .copy_from_slice(&src[from..from + head_dim]);
            }
        }
    });
}

/// Expand `[batch, kv_heads, seq, head_dim]` to `[batch, num_heads, seq, head_dim]`.
pub fn expand_kv_heads(kv: &Tensor, num_heads: usize) -> Result<Tensor> {
    if kv.rank() != 4 {
        return Err(BitNetError::RankError {
            name: "kv",
            expected: 4,
            actual: kv.rank(),
        });
    }
    let (batch, kv_heads, seq, head_dim) = (kv.shape()[0], kv.shape()[1], kv.shape()[2], kv.shape()[3]);
    if kv_heads == 0 || kv_heads > num_heads || num_heads % kv_heads != 0 {
        return Err(BitNetError::InvalidHeadCount(num_heads));
    }
    let mut out = Tensor::zeros(&[batch, num_heads, seq, head_dim])?;
    let src = kv.as_slice();
    let slab = seq * head_dim;
    for_each_row_chunk(out.as_mut_slice(), slab, |first, chunk| {
        for (i, dst) in chunk.chunks_mut(slab).enumerate() {
            let idx = first + i;
            let (b, h) = (idx / num_heads, idx % num_heads);
            let from = (b * kv_heads + kv_head_for(h, kv_heads)) * slab;
            dst.copy_from_slice(&src[from..from + slab]);
        }
    });
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct QkvProjection {
    hidden_size: usize,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    /// `[num_heads * head_dim, hidden]`
    wq: Tensor,
    /// `[num_kv_heads * head_dim, hidden]`
    wk: Tensor,
    /// `[num_kv_heads * head_dim, hidden]`
    wv: Tensor,
    rope: Option<Arc<RotaryEmbedding>>,
}

fn check_weight(name: &str, w: &Tensor, rows: usize, cols: usize) -> Result<()> {
    if w.shape() != [rows, cols] {
        return Err(BitNetError::ShapeMismatch(format!(
            "{name} weight {:?}, expected [{rows}, {cols}]",
            w.shape()
        )));
    }
    if !w.is_ternary() {
        return Err(BitNetError::InvalidWeightsFormat(format!(
            "{name} weight has values outside {{-1, 0, 1}}"
        )));
    }
    Ok(())
}

impl QkvProjection {
    pub fn new(
        hidden_size: usize,
        num_heads: usize,
        num_kv_heads: usize,
        wq: Tensor,
        wk: Tensor,
        wv: Tensor,
    ) -> Result<Self> {
        let head_dim = validate_heads(hidden_size, num_heads)?;
        if num_kv_heads == 0 || num_kv_heads > num_heads || num_heads % num_kv_heads != 0 {
            return Err(BitNetError::InvalidHeadCount(num_kv_heads));
        }
        let kv_dim = num_kv_heads * head_dim;
        check_weight("q", &wq, hidden_size, hidden_size)?;
        check_weight("k", &wk, kv_dim, hidden_size)?;
        check_weight("v", &wv, kv_dim, hidden_size)?;
        Ok(Self {
            hidden_size,
            num_heads,
            num_kv_heads,
            head_dim,
            wq,
            wk,
            wv,
            rope: None,
        })
    }

    /// Rotate Q and K by sequence position before they are returned.
    pub fn with_rope(mut self, rope: Arc<RotaryEmbedding>) -> Result<Self> {
        if rope.dim() != self.head_dim {
            return Err(BitNetError::DimensionMismatch {
                expected: self.head_dim,
                actual: rope.dim(),
            });
        }
        self.rope = Some(rope);
        Ok(self)
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn num_kv_heads(&self) -> usize {
        self.num_kv_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    pub fn rope(&self) -> Option<&RotaryEmbedding> {
        self.rope.as_deref()
    }

    /// Replace the projection weights, validating their shapes first.
    pub fn set_weights(&mut self, wq: Tensor, wk: Tensor, wv: Tensor) -> Result<()> {
        let kv_dim = self.num_kv_heads * self.head_dim;
        check_weight("q", &wq, self.hidden_size, self.hidden_size)?;
        check_weight("k", &wk, kv_dim, self.hidden_size)?;
        check_weight("v", &wv, kv_dim, self.hidden_size)?;
        self.wq = wq;
        self.wk = wk;
        self.wv = wv;
        Ok(())
    }

    pub(crate) fn weights(&self) -> (&Tensor, &Tensor, &Tensor) {
        (&self.wq, &self.wk, &self.wv)
    }

    /// Project `[batch, seq, hidden]` into per-head Q, K, V of shape `[batch, num_heads, seq, head_dim]`.
    pub fn project<'p>(
        &self,
        input: &Tensor,
        pool: &'p TensorPool,
    ) -> Result<(PooledTensor<'p>, PooledTensor<'p>, PooledTensor<'p>)> {
        if input.rank() != 3 {
            return Err(BitNetError::RankError {
                name: "qkv input",
                expected: 3,
                actual: input.rank(),
            });
        }
        if input.last_dim() != self.hidden_size {
            return Err(BitNetError::HiddenDimMismatch {
                expected: self.hidden_size,
                actual: input.last_dim(),
            });
        }
        let (batch, seq) = (input.shape()[0], input.shape()[1]);
        let kv_dim = self.num_kv_heads * self.head_dim;

        let mut q_flat = pool.checkout(&[batch, seq, self.hidden_size])?;
        let mut k_flat = pool.checkout(&[batch, seq, kv_dim])?;
        let mut v_flat = pool.checkout(&[batch, seq, kv_dim])?;
        bitlinear_into(input, &self.wq, &mut q_flat)?;
        bitlinear_into(input, &self.wk, &mut k_flat)?;
        bitlinear_into(input, &self.wv, &mut v_flat)?;

        let heads_shape = [batch, self.num_heads, seq, self.head_dim];
        let mut q = pool.checkout(&heads_shape)?;
        let mut k = pool.checkout(&heads_shape)?;
        let mut v = pool.checkout(&heads_shape)?;
        scatter_heads(q_flat.as_slice(), batch, seq, self.num_heads, self.head_dim, &mut q);
        scatter_heads(k_flat.as_slice(), batch, seq, self.num_kv_heads, self.head_dim, &mut k);
        scatter_heads(v_flat.as_slice(), batch, seq, self.num_kv_heads, self.head_dim, &mut v);

        if let Some(rope) = self.rope.as_deref().filter(|_| seq > 0) {
            if seq > rope.max_positions() {
                return Err(BitNetError::RopePosition {
                    position: seq - 1,
                    max: rope.max_positions(),
                });
            }
            // Every (batch, head) slab holds positions 0..seq.
            for slab in q.as_mut_slice().chunks_mut(seq * self.head_dim) {
                rope.apply_batch_i8(slab, 0)?;
            }
            for slab in k.as_mut_slice().chunks_mut(seq * self.head_dim) {
                rope.apply_batch_i8(slab, 0)?;
            }
        }
        Ok((q, k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: usize) -> Tensor {
        let mut t = Tensor::zeros(&[n, n]).unwrap();
        for i in 0..n {
            t.set(1, &[i, i]).unwrap();
        }
        t
    }

    #[test]
    fn expansion_uses_modulo_mapping() {
        let (batch, kv_heads, seq, hd) = (2, 4, 3, 8);
        let data: Vec<i8> = (0..batch * kv_heads * seq * hd).map(|i| (i % 127) as i8).collect();
        let kv = Tensor::from_vec(&[batch, kv_heads, seq, hd], data).unwrap();
        let expanded = expand_kv_heads(&kv, 8).unwrap();
        assert_eq!(expanded.shape(), &[2, 8, 3, 8]);
        for b in 0..batch {
            for s in 0..seq {
                for d in 0..hd {
                    assert_eq!(
                        expanded.get(&[b, 5, s, d]).unwrap(),
                        kv.get(&[b, 1, s, d]).unwrap()
                    );
                }
            }
        }
    }

    #[test]
    fn identity_projection_splits_heads() {
        let hidden = 16;
        let proj = QkvProjection::new(hidden, 2, 2, identity(hidden), identity(hidden), identity(hidden))
            .unwrap();
        let data: Vec<i8> = (0..2 * hidden as i8).collect();
        let x = Tensor::from_vec(&[1, 2, hidden], data).unwrap();
        let pool = TensorPool::new();
        let (q, k, v) = proj.project(&x, &pool).unwrap();
        assert_eq!(q.shape(), &[1, 2, 2, 8]);
        // Head 1, position 0 holds hidden channels 8..16 of token 0.
        assert_eq!(q.get(&[0, 1, 0, 0]).unwrap(), 8);
        // Head 0, position 1 holds channels 0..8 of token 1.
        assert_eq!(k.get(&[0, 0, 1, 0]).unwrap(), 16);
        assert_eq!(v.as_slice(), q.as_slice());
    }

    #[test]
    fn grouped_kv_heads_are_shared() {
        let hidden = 32;
        let kv_dim = 16;
        let mut wk = Tensor::zeros(&[kv_dim, hidden]).unwrap();
        for i in 0..kv_dim {
            wk.set(1, &[i, i]).unwrap();
        }
        let wv = wk.clone();
        let proj = QkvProjection::new(hidden, 4, 2, identity(hidden), wk, wv).unwrap();
        let data: Vec<i8> = (0..hidden as i8).collect();
        let x = Tensor::from_vec(&[1, 1, hidden], data).unwrap();
        let pool = TensorPool::new();
        let (_, k, _) = proj.project(&x, &pool).unwrap();
        let head = |h: usize| (0..8).map(|d| k.get(&[0, h, 0, d]).unwrap()).collect::<Vec<_>>();
        assert_eq!(head(2), head(0));
        assert_eq!(head(3), head(1));
        assert_ne!(head(0), head(1));
    }

    #[test]
    fn rejects_bad_layout() {
        let w = || Tensor::zeros(&[64, 64]).unwrap();
        assert!(matches!(
            QkvProjection::new(64, 0, 1, w(), w(), w()),
            Err(BitNetError::InvalidHeadCount(0))
        ));
        assert!(matches!(
            QkvProjection::new(64, 3, 3, w(), w(), w()),
            Err(BitNetError::InvalidHeadDimension { .. })
        ));
    }

    #[test]
    fn input_hidden_mismatch() {
        let proj = QkvProjection::new(16, 2, 2, identity(16), identity(16), identity(16)).unwrap();
        let x = Tensor::zeros(&[1, 2, 8]).unwrap();
        let pool = TensorPool::new();
        assert!(matches!(
            proj.project(&x, &pool),
            Err(BitNetError::HiddenDimMismatch { expected: 16, actual: 8 })
        ));
    }

    #[test]
    fn rejects_non_ternary_weights() {
        let mut wq = identity(16);
        wq.set(100, &[0, 0]).unwrap();
        assert!(matches!(
            QkvProjection::new(16, 2, 2, wq.clone(), identity(16), identity(16)),
            Err(BitNetError::InvalidWeightsFormat(_))
        ));
        let mut proj = QkvProjection::new(16, 2, 2, identity(16), identity(16), identity(16)).unwrap();
        assert!(matches!(
            proj.set_weights(identity(16), wq, identity(16)),
            Err(BitNetError::InvalidWeightsFormat(_))
        ));
        assert_eq!(proj.weights().1, &identity(16));
    }

    #[test]
    fn empty_sequence_with_rope() {
        let rope = Arc::new(RotaryEmbedding::new(10_000.0, 16, 8).unwrap());
        let proj = QkvProjection::new(16, 2, 2, identity(16), identity(16), identity(16))
            .unwrap()
            .with_rope(Arc::clone(&rope))
            .unwrap();
        let pool = TensorPool::new();
        for shape in [[1, 0, 16], [0, 3, 16]] {
            let (q, k, v) = proj.project(&Tensor::zeros(&shape).unwrap(), &pool).unwrap();
            assert_eq!(q.numel(), 0);
            assert_eq!(k.numel(), 0);
            assert_eq!(v.numel(), 0);
        }
        assert_eq!(Arc::strong_count(&rope), 2);
    }
}
