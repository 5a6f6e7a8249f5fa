//! Scaled dot-product attention over `[batch, heads, seq, head_dim]` int8 tensors.
//!
//! Scores and probabilities are computed in `f32`; only the per-element output
//! is re-quantized to int8. Each (batch, head) slab is independent and is the
//! unit of parallel work.

use crate::errors::{BitNetError, Result};
use crate::math::softmax_in_place;
use crate::parallel::for_each_row_chunk;
use crate::quantization::saturate_f32;
use crate::tensor::Tensor;

fn check_rank4(name: &'static str, t: &Tensor) -> Result<()> {
    if t.rank() != 4 {
        return Err(BitNetError::RankError {
            name,
            expected: 4,
            actual: t.rank(),
        });
    }
    Ok(())
}

/// Attention for a single head: `q`, `k`, `v` and `out` are `[seq, head_dim]` slabs.
///
/// `scores` is scratch space of at least `seq` elements.
pub fn attend_head(
    q: &[i8],
    k: &[i8],
    v: &[i8],
    seq: usize,
    head_dim: usize,
    scores: &mut [f32],
    out: &mut [i8],
) {
    let scale = (head_dim as f32).sqrt().recip();
    let scores = &mut scores[..seq];
    let mut acc = vec![0.0f32; head_dim];
    for i in 0..seq {
        let qi = &q[i * head_dim..(i + 1) * head_dim];
        for (j, score) in scores.iter_mut().enumerate() {
            let kj = &k[j * head_dim..(j + 1) * head_dim];
            let dot: i32 = qi.iter().zip(kj).map(|(&a, &b)| a as i32 * b as i32).sum();
            *score = dot as f32 * scale;
        }
        softmax_in_place(scores);

        acc.fill(0.0);
        for (j, &p) in scores.iter().enumerate() {
            let vj = &v[j * head_dim..(j + 1) * head_dim];
            for (a, &x) in acc.iter_mut().zip(vj) {
                *a += p * x as f32;
            }
        }
        for (o, &a) in out[i * head_dim..(i + 1) * head_dim].iter_mut().zip(&acc) {
            *o = saturate_f32(a);
        }
    }
}

/// Validate Q/K/V and return `(batch, heads, seq, head_dim)`.
fn check_operands(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<(usize, usize, usize, usize)> {
    check_rank4("q", q)?;
    check_rank4("k", k)?;
    check_rank4("v", v)?;
    if q.shape() != k.shape() || q.shape() != v.shape() {
        return Err(BitNetError::ShapeMismatch(format!(
            "q {:?}, k {:?}, v {:?}",
            q.shape(),
            k.shape(),
            v.shape()
        )));
    }
    let s = q.shape();
    Ok((s[0], s[1], s[2], s[3]))
}

/// `softmax(Q Kᵀ / sqrt(head_dim)) V` for every (batch, head).
pub fn scaled_dot_product_attention(q: &Tensor, k: &Tensor, v: &Tensor) -> Result<Tensor> {
    let mut out = Tensor::zeros(q.shape())?;
    scaled_dot_product_attention_into(q, k, v, &mut out)?;
    Ok(out)
}

/// Like [`scaled_dot_product_attention`] but writes into `out` (shape of `q`).
pub fn scaled_dot_product_attention_into(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    out: &mut Tensor,
) -> Result<()> {
    let (_, _, seq, head_dim) = check_operands(q, k, v)?;
    if out.shape() != q.shape() {
        return Err(BitNetError::ShapeMismatch(format!(
            "attention output {:?}, expected {:?}",
            out.shape(),
            q.shape()
        )));
    }
    let slab = seq * head_dim;
    let (qs, ks, vs) = (q.as_slice(), k.as_slice(), v.as_slice());
    for_each_row_chunk(out.as_mut_slice(), slab, |first, chunk| {
        let mut scores = vec![0.0f32; seq];
        for (i, out_slab) in chunk.chunks_mut(slab).enumerate() {
            let base = (first + i) * slab;
            let range = base..base + slab;
            attend_head(
                &qs[range.clone()],
                &ks[range.clone()],
                &vs[range],
                seq,
                head_dim,
                &mut scores,
                out_slab,
            );
        }
    });
    Ok(())
}
