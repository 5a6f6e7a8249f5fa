//! Forward pass and greedy text generation.

pub mod engine;
pub mod generator;

pub use engine::InferenceEngine;
pub use generator::TextGenerator;
