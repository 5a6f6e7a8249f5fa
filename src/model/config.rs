//! BitNet model configuration.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{BitNetError, Result};
use crate::math::{RotaryEmbedding, DEFAULT_ROPE_BASE, NORM_EPS};

/// Allowed range for the number of query heads.
pub const HEAD_COUNT_RANGE: std::ops::RangeInclusive<usize> = 1..=32;
/// Allowed range for the per-head dimension.
pub const HEAD_DIM_RANGE: std::ops::RangeInclusive<usize> = 8..=256;
/// Upper bound on `max_position_embeddings` (128k positions).
pub const MAX_POSITION_EMBEDDINGS: usize = 131_072;

fn default_norm_eps() -> f32 {
    NORM_EPS
}

fn default_rope_theta() -> f32 {
    DEFAULT_ROPE_BASE
}

/// Configuration for a BitNet transformer model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitNetConfig {
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Hidden size (embedding and hidden dimension).
    pub hidden_size: usize,
    /// Number of attention heads (query heads).
    pub num_attention_heads: usize,
    /// Number of key/value heads for GQA. Equal to `num_attention_heads` for MHA.
    pub num_key_value_heads: usize,
    /// Number of transformer blocks.
    pub num_hidden_layers: usize,
    /// FFN intermediate size.
    pub intermediate_size: usize,
    /// Maximum sequence length.
    pub max_position_embeddings: usize,
    /// Token that ends generation.
    pub eos_token_id: usize,
    #[serde(default = "default_norm_eps")]
    pub norm_eps: f32,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
    /// Rotate Q/K by position before attention.
    #[serde(default)]
    pub use_rope: bool,
}

impl Default for BitNetConfig {
    fn default() -> Self {
        Self {
            vocab_size: 32_000,
            hidden_size: 768,
            num_attention_heads: 12,
            num_key_value_heads: 12,
            num_hidden_layers: 12,
            intermediate_size: 3072,
            max_position_embeddings: 2048,
            eos_token_id: 2,
            norm_eps: NORM_EPS,
            rope_theta: DEFAULT_ROPE_BASE,
            use_rope: false,
        }
    }
}

/// Check a head layout: head count in range, exact division, head dim in range.
pub fn validate_heads(hidden_size: usize, num_heads: usize) -> Result<usize> {
    if !HEAD_COUNT_RANGE.contains(&num_heads) {
        return Err(BitNetError::InvalidHeadCount(num_heads));
    }
    if hidden_size % num_heads != 0 || !HEAD_DIM_RANGE.contains(&(hidden_size / num_heads)) {
        return Err(BitNetError::InvalidHeadDimension {
            hidden: hidden_size,
            heads: num_heads,
        });
    }
    Ok(hidden_size / num_heads)
}

impl BitNetConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BitNetError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("vocab_size", self.vocab_size),
            ("hidden_size", self.hidden_size),
            ("num_key_value_heads", self.num_key_value_heads),
            ("num_hidden_layers", self.num_hidden_layers),
            ("intermediate_size", self.intermediate_size),
            ("max_position_embeddings", self.max_position_embeddings),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, v)| *v == 0) {
            return Err(BitNetError::InvalidConfig(format!("{name} must be positive")));
        }
        if self.max_position_embeddings > MAX_POSITION_EMBEDDINGS {
            return Err(BitNetError::InvalidConfig(format!(
                "max_position_embeddings {} exceeds {MAX_POSITION_EMBEDDINGS}",
                self.max_position_embeddings
            )));
        }
        validate_heads(self.hidden_size, self.num_attention_heads)?;
        if self.num_key_value_heads > self.num_attention_heads
            || self.num_attention_heads % self.num_key_value_heads != 0
        {
            return Err(BitNetError::InvalidConfig(format!(
                "{} query heads cannot be grouped over {} key/value heads",
                self.num_attention_heads, self.num_key_value_heads
            )));
        }
        if self.eos_token_id >= self.vocab_size {
            return Err(BitNetError::InvalidConfig(format!(
                "eos_token_id {} outside vocabulary of {}",
                self.eos_token_id, self.vocab_size
            )));
        }
        if self.norm_eps.is_nan() || self.norm_eps <= 0.0 {
            return Err(BitNetError::InvalidConfig(
                "norm_eps must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Head dimension (same for Q, K, V).
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Number of KV heads.
    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads
    }

    /// Width of the K and V projections.
    pub fn kv_dim(&self) -> usize {
        self.num_key_value_heads * self.head_dim()
    }

    /// RoPE table for this configuration, or `None` when `use_rope` is off.
    ///
    /// Built once per model and shared by every attention sublayer.
    pub fn rotary_embedding(&self) -> Result<Option<Arc<RotaryEmbedding>>> {
        if !self.use_rope {
            return Ok(None);
        }
        let rope = RotaryEmbedding::new(
            self.rope_theta,
            self.max_position_embeddings,
            self.head_dim(),
        )?;
        Ok(Some(Arc::new(rope)))
    }

    /// Repeat factor: each KV head is shared by this many Q heads.
    pub fn num_q_per_kv(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads.max(1)
    }
}
