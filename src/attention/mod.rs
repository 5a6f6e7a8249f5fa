//! Multi-head attention with grouped-query key/value sharing.

pub mod output;
pub mod qkv;
pub mod sdpa;
pub mod sublayer;

pub use output::{concat_heads, OutputProjection};
pub use qkv::{expand_kv_heads, kv_head_for, QkvProjection};
pub use sdpa::{attend_head, scaled_dot_product_attention, scaled_dot_product_attention_into};
pub use sublayer::{AttentionSublayer, AttentionWeights};
