// ===========================================================================
//  Datei:        layer_dense.rs
//  Projekt:      chartrans – Character-Level Transformer Translator
//  Modul:        Dense (fully connected) layer
// ---------------------------------------------------------------------------
//  Used for the Q/K/V/output projections of attention, both feed-forward
//  layers and the final vocabulary projection.
// ===========================================================================
use bincode::{Decode, Encode};
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::math::he_normal;

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Dense {
    #[bincode(with_serde)]
    pub w: Array2<f32>, // [in, out]
    #[bincode(with_serde)]
    pub b: Array2<f32>, // [1, out]
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, i_in: usize, i_out: usize) -> Self {
        Dense {
            w: he_normal(rng, (i_in, i_out), i_in),
            b: Array2::zeros((1, i_out)),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.w.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.w.ncols()
    }

    pub fn parameter_count(&self) -> usize {
        self.w.len() + self.b.len()
    }

    /// Weights must be [in, out] and the bias [1, out].
    pub fn check_shape(&self, context: &'static str, i_in: usize, i_out: usize) -> ModelResult<()> {
        if self.w.dim() != (i_in, i_out) || self.b.dim() != (1, i_out) {
            return Err(ModelError::shape_mismatch(
                context,
                ((i_in, i_out), (1, i_out)),
                (self.w.dim(), self.b.dim()),
            ));
        }
        Ok(())
    }

    /// x · W + b for x of shape [seq, in].
    pub fn forward(&self, m_x: &Array2<f32>) -> ModelResult<Array2<f32>> {
        if m_x.ncols() != self.input_dim() {
            return Err(ModelError::shape_mismatch(
                "dense input width",
                self.input_dim(),
                m_x.ncols(),
            ));
        }
        Ok(m_x.dot(&self.w) + &self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn affine_transform() {
        let dense = Dense {
            w: array![[1.0f32, 0.0, 2.0], [0.0, 1.0, -1.0]],
            b: array![[0.5f32, 0.0, 1.0]],
        };
        let out = dense.forward(&array![[1.0f32, 2.0]]).unwrap();
        assert_eq!(out, array![[1.5f32, 2.0, 1.0]]);
    }

    #[test]
    fn rejects_wrong_width() {
        let dense = Dense::new(&mut StdRng::seed_from_u64(1), 4, 3);
        assert_eq!(dense.parameter_count(), 4 * 3 + 3);
        let err = dense.forward(&Array2::zeros((2, 5))).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn shape_check_covers_bias() {
        let mut dense = Dense::new(&mut StdRng::seed_from_u64(2), 4, 3);
        assert!(dense.check_shape("dense", 4, 3).is_ok());
        assert!(dense.check_shape("dense", 3, 4).is_err());
        dense.b = Array2::zeros((1, 2));
        assert!(dense.check_shape("dense", 4, 3).is_err());
    }
}
