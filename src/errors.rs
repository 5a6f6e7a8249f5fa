//! Central error types for bitnet-int8.

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, BitNetError>;

#[derive(Error, Debug)]
pub enum BitNetError {
    #[error("Shape error: shape {shape:?} holds {expected} elements, buffer has {actual}")]
    Shape {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid rank {0}: tensors must have between 1 and 4 dimensions")]
    InvalidRank(usize),

    #[error("Index {index:?} out of bounds for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Rank error: {name} must be rank {expected}, got rank {actual}")]
    RankError {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid head dimension: hidden size {hidden} over {heads} heads (head dim must divide exactly and lie in [8, 256])")]
    InvalidHeadDimension { hidden: usize, heads: usize },

    #[error("Invalid head count {0}: must lie in [1, 32]")]
    InvalidHeadCount(usize),

    #[error("Invalid input shape: {0}")]
    InvalidInputShape(String),

    #[error("Hidden dimension mismatch: expected {expected}, got {actual}")]
    HiddenDimMismatch { expected: usize, actual: usize },

    #[error("Sequence too long: {len} tokens exceeds maximum of {max}")]
    SequenceTooLong { len: usize, max: usize },

    #[error("Input must not be empty")]
    EmptyInput,

    #[error("Token {0} out of vocabulary range")]
    InvalidToken(usize),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("RoPE position {position} out of range (max positions {max})")]
    RopePosition { position: usize, max: usize },

    #[error("Failed to read weights: {0}")]
    WeightsFileRead(#[from] std::io::Error),

    #[error("Invalid weights format: {0}")]
    InvalidWeightsFormat(String),

    #[error("Weights version {0} not supported")]
    UnsupportedVersion(u32),
}
