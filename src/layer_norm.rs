// ===========================================================================
//  Datei:        layer_norm.rs
//  Projekt:      chartrans – Character-Level Transformer Translator
//  Modul:        Layer normalisation
// ---------------------------------------------------------------------------
//  Statistics are taken per position over the feature axis, so there are
//  no running statistics and inference and training normalise identically.
// ===========================================================================

use bincode::{Decode, Encode};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Layer normalisation with learned scale (gamma) and shift (beta).
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct LayerNorm {
    epsilon: f32,
    #[bincode(with_serde)]
    pub gamma: Array2<f32>, // [1, embed]
    #[bincode(with_serde)]
    pub beta: Array2<f32>, // [1, embed]
}

impl LayerNorm {
    /// γ = 1, β = 0.
    pub fn new(i_embedding_dim: usize, epsilon: f32) -> Self {
        LayerNorm {
            epsilon,
            gamma: Array2::ones((1, i_embedding_dim)),
            beta: Array2::zeros((1, i_embedding_dim)),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }

    pub fn check_width(&self, context: &'static str, i_dim: usize) -> ModelResult<()> {
        if self.gamma.dim() != (1, i_dim) || self.beta.dim() != (1, i_dim) {
            return Err(ModelError::shape_mismatch(
                context,
                (1, i_dim),
                (self.gamma.dim(), self.beta.dim()),
            ));
        }
        Ok(())
    }

    /// denom = sqrt(var + epsilon), population variance (ddof = 0)
    pub fn normalize(&self, input: &Array2<f32>) -> ModelResult<Array2<f32>> {
        if input.ncols() != self.gamma.ncols() {
            return Err(ModelError::shape_mismatch(
                "layer norm width",
                self.gamma.ncols(),
                input.ncols(),
            ));
        }
        let i_feat = input.ncols() as f32;
        let mean = input.sum_axis(Axis(1)).insert_axis(Axis(1)) / i_feat; // [seq, 1]
        let centered = input - &mean;
        let var = centered.mapv(|v| v * v).sum_axis(Axis(1)).insert_axis(Axis(1)) / i_feat;
        let denom = var.mapv(|v| (v + self.epsilon).sqrt());
        let x_hat = centered / &denom;
        Ok(&self.gamma * &x_hat + &self.beta)
    }
}
