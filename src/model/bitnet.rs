//! BitNet transformer architecture with ternary weights.

use std::sync::Arc;

use tracing::debug;

use super::config::BitNetConfig;
use super::ffn::{FfnSublayer, FfnWeights};
use crate::attention::{AttentionSublayer, AttentionWeights};
use crate::errors::{BitNetError, Result};
use crate::math::RotaryEmbedding;
use crate::tensor::{Tensor, TensorPool};

/// One transformer block: attention sublayer then FFN sublayer, each with its own norm gain.
#[derive(Debug, Clone)]
pub struct TransformerBlock {
    pub attention: AttentionSublayer,
    pub ffn: FfnSublayer,
}

impl TransformerBlock {
    /// `rope` is the model-wide table from [`BitNetConfig::rotary_embedding`].
    pub fn new(
        config: &BitNetConfig,
        attention: AttentionWeights,
        attention_norm: Vec<f32>,
        ffn: FfnWeights,
        ffn_norm: Vec<f32>,
        rope: Option<Arc<RotaryEmbedding>>,
    ) -> Result<Self> {
        Ok(Self {
            attention: AttentionSublayer::with_shared_rope(
                config,
                attention,
                attention_norm,
                rope,
            )?,
            ffn: FfnSublayer::new(config, ffn, ffn_norm)?,
        })
    }

    pub fn forward(&self, x: &Tensor, pool: &TensorPool) -> Result<Tensor> {
        let attended = self.attention.forward(x, pool)?;
        let out = self.ffn.forward(&attended, pool)?;
        pool.recycle(attended);
        Ok(out)
    }
}

/// Full BitNet model. Read-only once built.
#[derive(Debug, Clone)]
pub struct BitNetModel {
    pub config: BitNetConfig,
    pub blocks: Vec<TransformerBlock>,
    /// Ternary token embeddings `[vocab_size, hidden_size]`, shared with the LM head.
    pub embedding: Tensor,
    /// Final norm gain.
    pub norm: Vec<f32>,
}

impl BitNetModel {
    pub fn new(
        config: BitNetConfig,
        blocks: Vec<TransformerBlock>,
        embedding: Tensor,
        norm: Vec<f32>,
    ) -> Result<Self> {
        config.validate()?;
        if blocks.len() != config.num_hidden_layers {
            return Err(BitNetError::InvalidConfig(format!(
                "expected {} blocks, got {}",
                config.num_hidden_layers,
                blocks.len()
            )));
        }
        if embedding.shape() != [config.vocab_size, config.hidden_size] {
            return Err(BitNetError::ShapeMismatch(format!(
                "embedding {:?}, expected [{}, {}]",
                embedding.shape(),
                config.vocab_size,
                config.hidden_size
            )));
        }
        if !embedding.is_ternary() {
            return Err(BitNetError::InvalidWeightsFormat(
                "embedding table must be ternary".to_string(),
            ));
        }
        if norm.len() != config.hidden_size {
            return Err(BitNetError::DimensionMismatch {
                expected: config.hidden_size,
                actual: norm.len(),
            });
        }
        debug!(
            layers = blocks.len(),
            hidden = config.hidden_size,
            vocab = config.vocab_size,
            "model assembled"
        );
        Ok(Self {
            config,
            blocks,
            embedding,
            norm,
        })
    }

    /// Hidden size from config.
    pub fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    /// Vocabulary size from config.
    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    /// Number of transformer blocks.
    pub fn num_layers(&self) -> usize {
        self.blocks.len()
    }
}
