//! Build a tiny demo BitNet model for testing (random ternary weights).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::bitnet::{BitNetModel, TransformerBlock};
use super::config::BitNetConfig;
use super::ffn::FfnWeights;
use crate::attention::AttentionWeights;
use crate::errors::Result;
use crate::tensor::Tensor;

fn rand_ternary(rng: &mut impl Rng, rows: usize, cols: usize) -> Result<Tensor> {
    let data = (0..rows * cols).map(|_| rng.gen_range(-1i8..=1)).collect();
    Tensor::from_vec(&[rows, cols], data)
}

/// Norm gains large enough that normalized activations use a good part of the int8 range.
fn rand_gamma(rng: &mut impl Rng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.gen_range(12.0f32..=20.0f32)).collect()
}

/// Configuration of the demo model: 2 blocks, 4 query heads over 2 KV heads.
pub fn demo_config() -> BitNetConfig {
    BitNetConfig {
        vocab_size: 256,
        hidden_size: 64,
        num_attention_heads: 4,
        num_key_value_heads: 2,
        num_hidden_layers: 2,
        intermediate_size: 128,
        max_position_embeddings: 128,
        eos_token_id: 255,
        ..BitNetConfig::default()
    }
}

/// Create a small demo model with random ternary weights.
pub fn create_demo_model() -> Result<BitNetModel> {
    create_demo_model_seeded(rand::random::<u64>())
}

/// Create a deterministic demo model from a seed (for tests and golden outputs).
pub fn create_demo_model_seeded(seed: u64) -> Result<BitNetModel> {
    create_model_seeded(demo_config(), seed)
}

/// Random ternary model for an arbitrary configuration.
pub fn create_model_seeded(config: BitNetConfig, seed: u64) -> Result<BitNetModel> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    let hidden = config.hidden_size;
    let kv = config.kv_dim();
    let intermed = config.intermediate_size;

    let rope = config.rotary_embedding()?;
    let mut blocks = Vec::with_capacity(config.num_hidden_layers);
    for _ in 0..config.num_hidden_layers {
        let attention = AttentionWeights {
            q: rand_ternary(&mut rng, hidden, hidden)?,
            k: rand_ternary(&mut rng, kv, hidden)?,
            v: rand_ternary(&mut rng, kv, hidden)?,
            o: rand_ternary(&mut rng, hidden, hidden)?,
        };
        let ffn = FfnWeights {
            up: rand_ternary(&mut rng, intermed, hidden)?,
            down: rand_ternary(&mut rng, hidden, intermed)?,
        };
        let attention_norm = rand_gamma(&mut rng, hidden);
        let ffn_norm = rand_gamma(&mut rng, hidden);
        blocks.push(TransformerBlock::new(
            &config,
            attention,
            attention_norm,
            ffn,
            ffn_norm,
            rope.clone(),
        )?);
    }

    let embedding = rand_ternary(&mut rng, config.vocab_size, hidden)?;
    let norm = rand_gamma(&mut rng, hidden);
    BitNetModel::new(config, blocks, embedding, norm)
}
