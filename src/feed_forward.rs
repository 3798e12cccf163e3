// ===========================================================================
//  Datei:        feed_forward.rs
//  Projekt:      chartrans – Character-Level Transformer Translator
//  Modul:        Point-wise feed-forward block
// ---------------------------------------------------------------------------
//  Beschreibung:
//          1) Linear    :  input · w1 + b1      [seq, d_model] -> [seq, dff]
//          2) Activation:  ReLU
//          3) Linear    :  hidden · w2 + b2     [seq, dff] -> [seq, d_model]
//
//      Every position is transformed independently. The residual connection
//      belongs to the enclosing encoder/decoder layer, not to this block.
// ===========================================================================

use bincode::{Decode, Encode};
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ModelResult;
use crate::layer_dense::Dense;

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct FeedForward {
    pub dense1: Dense, // [d_model, dff]
    pub dense2: Dense, // [dff, d_model]
}

impl FeedForward {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, i_d_model: usize, i_dff: usize) -> Self {
        FeedForward {
            dense1: Dense::new(rng, i_d_model, i_dff),
            dense2: Dense::new(rng, i_dff, i_d_model),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.dense1.parameter_count() + self.dense2.parameter_count()
    }

    pub fn check_geometry(&self, i_d_model: usize, i_dff: usize) -> ModelResult<()> {
        self.dense1.check_shape("ffn dense1", i_d_model, i_dff)?;
        self.dense2.check_shape("ffn dense2", i_dff, i_d_model)
    }

    pub fn forward(&self, input: &Array2<f32>) -> ModelResult<Array2<f32>> {
        let hidden = self.dense1.forward(input)?.mapv(|x| x.max(0.0));
        self.dense2.forward(&hidden)
    }
}
