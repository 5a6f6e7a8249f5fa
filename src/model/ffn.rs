//! Feed-forward sublayer: norm → up → ReLU² → down → residual.

use tracing::trace;

use crate::errors::{BitNetError, Result};
use crate::kernels::bitlinear_into;
use crate::math::{layer_norm_into, relu_squared_i8};
use crate::model::BitNetConfig;
use crate::quantization::saturate::residual_add_into;
use crate::tensor::{Tensor, TensorPool};

/// Ternary weights for one FFN sublayer.
#[derive(Debug, Clone)]
pub struct FfnWeights {
    /// `[intermediate, hidden]`
    pub up: Tensor,
    /// `[hidden, intermediate]`
    pub down: Tensor,
}

#[derive(Debug, Clone)]
pub struct FfnSublayer {
    hidden_size: usize,
    intermediate_size: usize,
    norm: Vec<f32>,
    eps: f32,
    weights: FfnWeights,
}

impl FfnSublayer {
    pub fn new(config: &BitNetConfig, weights: FfnWeights, norm: Vec<f32>) -> Result<Self> {
        if norm.len() != config.hidden_size {
            return Err(BitNetError::DimensionMismatch {
                expected: config.hidden_size,
                actual: norm.len(),
            });
        }
        let mut layer = Self {
            hidden_size: config.hidden_size,
            intermediate_size: config.intermediate_size,
            norm,
            eps: config.norm_eps,
            weights: FfnWeights {
                up: Tensor::zeros(&[config.intermediate_size, config.hidden_size])?,
                down: Tensor::zeros(&[config.hidden_size, config.intermediate_size])?,
            },
        };
        layer.set_weights(weights)?;
        Ok(layer)
    }

    /// Swap in new weights. The previous weights are dropped.
    pub fn set_weights(&mut self, weights: FfnWeights) -> Result<()> {
        let (h, i) = (self.hidden_size, self.intermediate_size);
        if weights.up.shape() != [i, h] || weights.down.shape() != [h, i] {
            return Err(BitNetError::ShapeMismatch(format!(
                "ffn up {:?} / down {:?}, expected [{i}, {h}] / [{h}, {i}]",
                weights.up.shape(),
                weights.down.shape()
            )));
        }
        if !weights.up.is_ternary() || !weights.down.is_ternary() {
            return Err(BitNetError::InvalidWeightsFormat(
                "ffn weights have values outside {-1, 0, 1}".to_string(),
            ));
        }
        self.weights = weights;
        Ok(())
    }

    pub fn weights(&self) -> &FfnWeights {
        &self.weights
    }

    pub fn norm(&self) -> &[f32] {
        &self.norm
    }

    /// Any rank-2 or rank-3 input with last axis `hidden`; same shape out.
    pub fn forward(&self, x: &Tensor, pool: &TensorPool) -> Result<Tensor> {
        if x.last_dim() != self.hidden_size {
            return Err(BitNetError::HiddenDimMismatch {
                expected: self.hidden_size,
                actual: x.last_dim(),
            });
        }
        if x.rank() < 2 {
            return Err(BitNetError::InvalidInputShape(format!(
                "ffn expects [.., seq, hidden], got {:?}",
                x.shape()
            )));
        }
        trace!(rows = x.rows(), "ffn sublayer");

        let mut normed = pool.checkout(x.shape())?;
        layer_norm_into(x, &self.norm, self.eps, &mut normed)?;

        let mut up_shape = x.shape().to_vec();
        if let Some(last) = up_shape.last_mut() {
            *last = self.intermediate_size;
        }
        let mut up = pool.checkout(&up_shape)?;
        bitlinear_into(&normed, &self.weights.up, &mut up)?;
        for v in up.as_mut_slice() {
            *v = relu_squared_i8(*v);
        }

        let mut down = pool.checkout(x.shape())?;
        bitlinear_into(&up, &self.weights.down, &mut down)?;

        let mut out = Tensor::from_vec(x.shape(), x.as_slice().to_vec())?;
        residual_add_into(out.as_mut_slice(), down.as_slice());
        Ok(out)
    }
}
