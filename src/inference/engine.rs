//! Inference engine: embedding → transformer blocks → final norm → LM head.

use tracing::debug;

use crate::errors::{BitNetError, Result};
use crate::kernels::bitlinear_accumulate;
use crate::math::layer_norm;
use crate::model::BitNetModel;
use crate::tensor::{Tensor, TensorPool};

/// Runs forward passes over a loaded model.
///
/// Every call is independent: there is no KV cache, attention is recomputed
/// over the full supplied sequence.
pub struct InferenceEngine {
    model: BitNetModel,
    pool: TensorPool,
}

impl InferenceEngine {
    pub fn new(model: BitNetModel) -> Self {
        Self {
            model,
            pool: TensorPool::new(),
        }
    }

    pub fn model(&self) -> &BitNetModel {
        &self.model
    }

    pub fn pool(&self) -> &TensorPool {
        &self.pool
    }

    fn check_ids(&self, input_ids: &[usize]) -> Result<()> {
        if input_ids.is_empty() {
            return Err(BitNetError::EmptyInput);
        }
        let max = self.model.config.max_position_embeddings;
        if input_ids.len() > max {
            return Err(BitNetError::SequenceTooLong {
                len: input_ids.len(),
                max,
            });
        }
        let vocab = self.model.vocab_size();
        if let Some(&bad) = input_ids.iter().find(|&&id| id >= vocab) {
            return Err(BitNetError::InvalidToken(bad));
        }
        Ok(())
    }

    /// Embed a batch of equal-length sequences into `[batch, seq, hidden]`.
    ///
    /// Each token copies its ternary embedding row, so activations start in {-1, 0, 1}.
    pub fn embed_batch(&self, batch: &[Vec<usize>]) -> Result<Tensor> {
        let seq = batch.first().map_or(0, Vec::len);
        if batch.iter().any(|ids| ids.len() != seq) {
            return Err(BitNetError::ShapeMismatch(
                "all sequences in a batch must have the same length".to_string(),
            ));
        }
        for ids in batch {
            self.check_ids(ids)?;
        }
        let hidden = self.model.hidden_size();
        let mut out = self.pool.checkout(&[batch.len(), seq, hidden])?.detach();
        for (row, &id) in out
            .as_mut_slice()
            .chunks_mut(hidden)
            .zip(batch.iter().flatten())
        {
            row.copy_from_slice(self.model.embedding.row(id)?);
        }
        Ok(out)
    }

    /// Embed one sequence into `[1, seq, hidden]`.
    pub fn embed_tokens(&self, input_ids: &[usize]) -> Result<Tensor> {
        self.embed_batch(&[input_ids.to_vec()])
    }

    /// Run every block in sequence over `[batch, seq, hidden]`.
    pub fn forward_hidden(&self, mut hidden: Tensor) -> Result<Tensor> {
        for (layer, block) in self.model.blocks.iter().enumerate() {
            let next = block.forward(&hidden, &self.pool)?;
            self.pool.recycle(std::mem::replace(&mut hidden, next));
            debug!(layer, "block done");
        }
        Ok(hidden)
    }

    /// Final norm and LM head for one hidden row.
    fn logits_for_row(&self, row: &[i8]) -> Result<Vec<f32>> {
        let hidden = Tensor::from_vec(&[1, row.len()], row.to_vec())?;
        let normed = layer_norm(&hidden, &self.model.norm, self.model.config.norm_eps)?;
        let acc = bitlinear_accumulate(normed.as_slice(), &self.model.embedding)?;
        Ok(acc.into_iter().map(|v| v as f32).collect())
    }

    /// Forward pass; returns logits for the last token `[vocab_size]`.
    pub fn forward(&self, input_ids: &[usize]) -> Result<Vec<f32>> {
        let mut logits = self.forward_batch(&[input_ids.to_vec()])?;
        logits.pop().ok_or(BitNetError::EmptyInput)
    }

    /// Batched forward over equal-length sequences; returns last-token logits per sequence.
    pub fn forward_batch(&self, batch: &[Vec<usize>]) -> Result<Vec<Vec<f32>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let embedded = self.embed_batch(batch)?;
        let (b, seq) = (embedded.shape()[0], embedded.shape()[1]);
        debug!(batch = b, seq, "forward");
        let hidden = self.forward_hidden(embedded)?;

        let result = (0..b)
            .map(|i| self.logits_for_row(hidden.row(i * seq + seq - 1)?))
            .collect::<Result<Vec<_>>>();
        self.pool.recycle(hidden);
        result
    }
}
