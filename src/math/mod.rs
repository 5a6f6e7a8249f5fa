//! Numeric building blocks: normalization, softmax, activations and rotary encoding.

pub mod activation;
pub mod norm;
pub mod rope;
pub mod softmax;

pub use activation::{relu_squared, relu_squared_i8, RELU2_DOWNSCALE};
pub use norm::{layer_norm, layer_norm_into, normalize_row, NORM_EPS};
pub use rope::{RotaryEmbedding, DEFAULT_ROPE_BASE};
pub use softmax::{argmax, softmax, softmax_in_place};
