//! Attention sublayer: norm → QKV → attention → output projection → residual.

use std::sync::Arc;

use tracing::trace;

use super::output::{concat_heads_into, OutputProjection};
use super::qkv::QkvProjection;
use super::sdpa::scaled_dot_product_attention_into;
use crate::errors::{BitNetError, Result};
use crate::math::{layer_norm_into, RotaryEmbedding};
use crate::model::BitNetConfig;
use crate::quantization::saturate::residual_add_into;
use crate::tensor::{Tensor, TensorPool};

/// Ternary projection weights for one attention sublayer.
#[derive(Debug, Clone)]
pub struct AttentionWeights {
    /// `[hidden, hidden]`
    pub q: Tensor,
    /// `[kv_dim, hidden]`
    pub k: Tensor,
    /// `[kv_dim, hidden]`
    pub v: Tensor,
    /// `[hidden, hidden]`
    pub o: Tensor,
}

#[derive(Debug, Clone)]
pub struct AttentionSublayer {
    hidden_size: usize,
    norm: Vec<f32>,
    eps: f32,
    qkv: QkvProjection,
    output: OutputProjection,
}

impl AttentionSublayer {
    /// Builds its own RoPE table when `config.use_rope` is set.
    pub fn new(config: &BitNetConfig, weights: AttentionWeights, norm: Vec<f32>) -> Result<Self> {
        Self::with_shared_rope(config, weights, norm, config.rotary_embedding()?)
    }

    /// Like [`AttentionSublayer::new`] but reuses a RoPE table shared across blocks.
    /// `None` disables the RoPE stage.
    pub fn with_shared_rope(
        config: &BitNetConfig,
        weights: AttentionWeights,
        norm: Vec<f32>,
        rope: Option<Arc<RotaryEmbedding>>,
    ) -> Result<Self> {
        if norm.len() != config.hidden_size {
            return Err(BitNetError::DimensionMismatch {
                expected: config.hidden_size,
                actual: norm.len(),
            });
        }
        let mut qkv = QkvProjection::new(
            config.hidden_size,
            config.num_attention_heads,
            config.num_key_value_heads,
            weights.q,
            weights.k,
            weights.v,
        )?;
        if let Some(rope) = rope {
            qkv = qkv.with_rope(rope)?;
        }
        let output = OutputProjection::new(
            config.num_attention_heads,
            config.head_dim(),
            config.hidden_size,
            weights.o,
        )?;
        Ok(Self {
            hidden_size: config.hidden_size,
            norm,
            eps: config.norm_eps,
            qkv,
            output,
        })
    }

    /// Swap in new projection weights. The previous weights are dropped.
    pub fn set_weights(&mut self, weights: AttentionWeights) -> Result<()> {
        // Validate `o` before touching Q/K/V so a failure leaves the layer unchanged.
        self.output.validate_weight(&weights.o)?;
        self.qkv.set_weights(weights.q, weights.k, weights.v)?;
        self.output.set_weight(weights.o)
    }

    pub fn norm(&self) -> &[f32] {
        &self.norm
    }

    pub fn qkv(&self) -> &QkvProjection {
        &self.qkv
    }

    pub(crate) fn weight_refs(&self) -> [&Tensor; 4] {
        let (q, k, v) = self.qkv.weights();
        [q, k, v, self.output.weight()]
    }

    /// `[seq, hidden]` or `[batch, seq, hidden]` in, same shape out.
    pub fn forward(&self, x: &Tensor, pool: &TensorPool) -> Result<Tensor> {
        let (batch, seq) = match x.shape() {
            [s, _] => (1, *s),
            [b, s, _] => (*b, *s),
            other => {
                return Err(BitNetError::InvalidInputShape(format!(
                    "attention expects [seq, hidden] or [batch, seq, hidden], got {other:?}"
                )))
            }
        };
        if x.last_dim() != self.hidden_size {
            return Err(BitNetError::HiddenDimMismatch {
                expected: self.hidden_size,
                actual: x.last_dim(),
            });
        }
        trace!(batch, seq, "attention sublayer");

        let mut normed = pool.checkout(x.shape())?;
        layer_norm_into(x, &self.norm, self.eps, &mut normed)?;
        normed.reshape(&[batch, seq, self.hidden_size])?;

        let (q, k, v) = self.qkv.project(&normed, pool)?;

        let mut heads = pool.checkout(q.shape())?;
        scaled_dot_product_attention_into(&q, &k, &v, &mut heads)?;

        let width = self.qkv.num_heads() * self.qkv.head_dim();
        let mut concat = pool.checkout(&[batch, seq, width])?;
        concat_heads_into(&heads, &mut concat);

        let mut projected = pool.checkout(&[batch, seq, self.hidden_size])?;
        self.output.project_into(&concat, &mut projected)?;

        let mut out = Tensor::from_vec(x.shape(), x.as_slice().to_vec())?;
        residual_add_into(out.as_mut_slice(), projected.as_slice());
        Ok(out)
    }
}
