//! Greedy autoregressive generation.

use tracing::debug;

use crate::errors::{BitNetError, Result};
use crate::inference::engine::InferenceEngine;
use crate::math::{argmax, softmax};
use crate::model::BitNetModel;

/// Text generator wrapping the inference engine.
pub struct TextGenerator {
    engine: InferenceEngine,
}

impl TextGenerator {
    pub fn new(model: BitNetModel) -> Self {
        Self::from_engine(InferenceEngine::new(model))
    }

    pub fn from_engine(engine: InferenceEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    /// Generate token IDs greedily (arg-max at each step).
    ///
    /// Returns the prompt followed by generated tokens. Stops after emitting the
    /// end-of-sequence token (which is kept), at `max_length` total tokens, or at
    /// the model's maximum sequence length.
    pub fn generate(&self, prompt_ids: &[usize], max_length: usize) -> Result<Vec<usize>> {
        self.generate_with(prompt_ids, max_length, |_| {})
    }

    /// Like [`TextGenerator::generate`], calling `on_token` for each new token.
    pub fn generate_with(
        &self,
        prompt_ids: &[usize],
        max_length: usize,
        mut on_token: impl FnMut(usize),
    ) -> Result<Vec<usize>> {
        if prompt_ids.is_empty() {
            return Err(BitNetError::EmptyInput);
        }
        let config = &self.engine.model().config;
        if prompt_ids.len() > config.max_position_embeddings {
            return Err(BitNetError::SequenceTooLong {
                len: prompt_ids.len(),
                max: config.max_position_embeddings,
            });
        }
        let limit = max_length.min(config.max_position_embeddings);
        let mut ids = prompt_ids.to_vec();
        while ids.len() < limit {
            let logits = self.engine.forward(&ids)?;
            let probs = softmax(&logits);
            let next = argmax(&probs).ok_or(BitNetError::EmptyInput)?;
            ids.push(next);
            on_token(next);
            debug!(step = ids.len() - prompt_ids.len(), token = next, "generated");
            if next == config.eos_token_id {
                break;
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{create_model_seeded, demo_config};

    #[test]
    fn respects_max_length() {
        let gen = TextGenerator::new(crate::model::create_demo_model_seeded(4).unwrap());
        let out = gen.generate(&[1, 2], 6).unwrap();
        assert!(out.len() >= 3 && out.len() <= 6);
        assert_eq!(&out[..2], &[1, 2]);
        // max_length below the prompt length returns the prompt unchanged.
        assert_eq!(gen.generate(&[1, 2, 3], 2).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn stops_at_eos() {
        let engine = InferenceEngine::new(create_model_seeded(demo_config(), 11).unwrap());
        let first = argmax(&engine.forward(&[7]).unwrap()).unwrap();
        // Make the first predicted token the EOS token, then generation ends right there.
        let mut config = demo_config();
        config.eos_token_id = first;
        let gen = TextGenerator::new(create_model_seeded(config, 11).unwrap());
        let mut streamed = Vec::new();
        let out = gen.generate_with(&[7], 50, |t| streamed.push(t)).unwrap();
        assert_eq!(out, vec![7, first]);
        assert_eq!(streamed, vec![first]);
    }

    #[test]
    fn prompt_validation() {
        let gen = TextGenerator::new(crate::model::create_demo_model_seeded(5).unwrap());
        assert!(matches!(gen.generate(&[], 4), Err(BitNetError::EmptyInput)));
        let long = vec![0usize; 200];
        assert!(matches!(
            gen.generate(&long, 300),
            Err(BitNetError::SequenceTooLong { len: 200, max: 128 })
        ));
    }
}
