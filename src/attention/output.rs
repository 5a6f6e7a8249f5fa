//! Head concatenation and the attention output projection.

use crate::errors::{BitNetError, Result};
use crate::kernels::bitlinear_into;
use crate::parallel::for_each_row_chunk;
use crate::tensor::Tensor;

/// `[batch, heads, seq, head_dim]` → `[batch, seq, heads * head_dim]`.
pub fn concat_heads(attn: &Tensor) -> Result<Tensor> {
    if attn.rank() != 4 {
        return Err(BitNetError::RankError {
            name: "attention output",
            expected: 4,
            actual: attn.rank(),
        });
    }
    let s = attn.shape();
    let (batch, heads, seq, head_dim) = (s[0], s[1], s[2], s[3]);
    let mut out = Tensor::zeros(&[batch, seq, heads * head_dim])?;
    concat_heads_into(attn, &mut out);
    Ok(out)
}

/// Caller guarantees `out` is `[batch, seq, heads * head_dim]` for a rank-4 `attn`.
pub(crate) fn concat_heads_into(attn: &Tensor, out: &mut Tensor) {
    let s = attn.shape();
    let (heads, seq, head_dim) = (s[1], s[2], s[3]);
    let src = attn.as_slice();
    let width = heads * head_dim;
    for_each_row_chunk(out.as_mut_slice(), width, |first, chunk| {
        for (i, row) in chunk.chunks_mut(width).enumerate() {
            let (b, t) = ((first + i) / seq, (first + i) % seq);
            for h in 0..heads {
                let from = ((b * heads + h) * seq + t) * head_dim;
                row[h * head_dim..(h + 1) * head_dim].copy_from_slice(&src[from..from + head_dim]);
            }
        }
    });
}

#[derive(Debug, Clone)]
pub struct OutputProjection {
    num_heads: usize,
    head_dim: usize,
    hidden_size: usize,
    /// `[hidden, num_heads * head_dim]`
    wo: Tensor,
}

impl OutputProjection {
    pub fn new(num_heads: usize, head_dim: usize, hidden_size: usize, wo: Tensor) -> Result<Self> {
        Self::check_weight(&wo, hidden_size, num_heads * head_dim)?;
        Ok(Self {
            num_heads,
            head_dim,
            hidden_size,
            wo,
        })
    }

    fn check_weight(wo: &Tensor, hidden: usize, width: usize) -> Result<()> {
        if wo.shape() != [hidden, width] {
            return Err(BitNetError::ShapeMismatch(format!(
                "o weight {:?}, expected [{hidden}, {width}]",
                wo.shape()
            )));
        }
        if !wo.is_ternary() {
            return Err(BitNetError::InvalidWeightsFormat(
                "o weight has values outside {-1, 0, 1}".to_string(),
            ));
        }
        Ok(())
    }

    /// Check `wo` without installing it.
    pub fn validate_weight(&self, wo: &Tensor) -> Result<()> {
        Self::check_weight(wo, self.hidden_size, self.num_heads * self.head_dim)
    }

    pub fn set_weight(&mut self, wo: Tensor) -> Result<()> {
        self.validate_weight(&wo)?;
        self.wo = wo;
        Ok(())
    }

    pub(crate) fn weight(&self) -> &Tensor {
        &self.wo
    }

    fn check_input(&self, concat: &Tensor) -> Result<()> {
        let width = self.num_heads * self.head_dim;
        if concat.rank() != 3 {
            return Err(BitNetError::InvalidInputShape(format!(
                "expected [batch, seq, {width}], got {:?}",
                concat.shape()
            )));
        }
        if concat.numel() % width != 0 || concat.last_dim() != width {
            return Err(BitNetError::InvalidInputShape(format!(
                "row width {} is not {} heads x {}",
                concat.last_dim(),
                self.num_heads,
                self.head_dim
            )));
        }
        Ok(())
    }

    /// `[batch, seq, heads * head_dim]` → `[batch, seq, hidden]`.
    pub fn project(&self, concat: &Tensor) -> Result<Tensor> {
        self.check_input(concat)?;
        let s = concat.shape();
        let mut out = Tensor::zeros(&[s[0], s[1], self.hidden_size])?;
        bitlinear_into(concat, &self.wo, &mut out)?;
        Ok(out)
    }

    pub fn project_into(&self, concat: &Tensor, out: &mut Tensor) -> Result<()> {
        self.check_input(concat)?;
        bitlinear_into(concat, &self.wo, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_interleaves_heads_per_position() {
        // [1, 2 heads, 2 seq, 2 dim]
        let attn = Tensor::from_vec(&[1, 2, 2, 2], vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let c = concat_heads(&attn).unwrap();
        assert_eq!(c.shape(), &[1, 2, 4]);
        assert_eq!(c.as_slice(), &[1, 2, 5, 6, 3, 4, 7, 8]);
    }

    #[test]
    fn projection_shapes() {
        let mut wo = Tensor::zeros(&[16, 16]).unwrap();
        for i in 0..16 {
            wo.set(-1, &[i, i]).unwrap();
        }
        let proj = OutputProjection::new(2, 8, 16, wo).unwrap();
        let x = Tensor::from_vec(&[1, 1, 16], (0..16).collect()).unwrap();
        let y = proj.project(&x).unwrap();
        assert_eq!(y.shape(), &[1, 1, 16]);
        assert_eq!(y.get(&[0, 0, 5]).unwrap(), -5);
    }

    #[test]
    fn rejects_bad_input() {
        let proj = OutputProjection::new(2, 8, 16, Tensor::zeros(&[16, 16]).unwrap()).unwrap();
        assert!(matches!(
            proj.project(&Tensor::zeros(&[2, 16]).unwrap()),
            Err(BitNetError::InvalidInputShape(_))
        ));
        assert!(matches!(
            proj.project(&Tensor::zeros(&[1, 2, 12]).unwrap()),
            Err(BitNetError::InvalidInputShape(_))
        ));
    }

    #[test]
    fn rejects_non_ternary_weight() {
        let mut wo = Tensor::zeros(&[16, 16]).unwrap();
        wo.set(2, &[3, 3]).unwrap();
        assert!(matches!(
            OutputProjection::new(2, 8, 16, wo.clone()),
            Err(BitNetError::InvalidWeightsFormat(_))
        ));
        let mut proj = OutputProjection::new(2, 8, 16, Tensor::zeros(&[16, 16]).unwrap()).unwrap();
        assert!(proj.set_weight(wo).is_err());
        assert!(proj.weight().is_ternary());
    }
}
