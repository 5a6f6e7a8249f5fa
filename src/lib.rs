//! # bitnet-int8
//!
//! CPU inference for ternary-weight ("1.58-bit") transformer language models.
//!
//! ## Architecture
//!
//! - **Tensors**: flat int8 buffers with a shape; every stage re-quantizes to int8 with saturation
//! - **BitLinear**: int8 × {-1, 0, +1} matmul with int32 accumulation
//! - **Attention**: SubLN → QKV (grouped-query) → scaled dot-product → output projection → residual
//! - **FFN**: SubLN → up → ReLU² → down → residual
//! - **Inference**: full forward pass and greedy generation
//! - **Weights**: packed ternary file format, 4 weights per byte

pub mod attention;
pub mod errors;
pub mod inference;
pub mod kernels;
pub mod math;
pub mod model;
pub mod parallel;
pub mod quantization;
pub mod tensor;

pub use attention::{
    expand_kv_heads, scaled_dot_product_attention, AttentionSublayer, AttentionWeights,
    OutputProjection, QkvProjection,
};
pub use errors::{BitNetError, Result};
pub use inference::{InferenceEngine, TextGenerator};
pub use kernels::{bitlinear, pack_ternary, unpack_ternary, TernaryWeight};
pub use math::{argmax, layer_norm, normalize_row, relu_squared, softmax, RotaryEmbedding};
pub use model::{
    create_demo_model, create_demo_model_seeded, load_weights, save_weights, BitNetConfig,
    BitNetModel, FfnSublayer, FfnWeights, TransformerBlock,
};
pub use quantization::{residual_add, saturate_f32, saturate_i32};
pub use tensor::{PooledTensor, Tensor, TensorPool};
