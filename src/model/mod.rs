//! BitNet model types, configuration and weight loading.

pub mod bitnet;
pub mod config;
pub mod demo;
pub mod ffn;
pub mod loader;

pub use bitnet::{BitNetModel, TransformerBlock};
pub use config::BitNetConfig;
pub use demo::{create_demo_model, create_demo_model_seeded, create_model_seeded, demo_config};
pub use ffn::{FfnSublayer, FfnWeights};
pub use loader::{load_weights, read_weights, save_weights, write_weights};
