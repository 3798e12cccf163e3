// ===========================================================================
//  Datei:        embeddings.rs
//  Projekt:      chartrans – Character-Level Transformer Translator
//  Modul:        Token embeddings
// ---------------------------------------------------------------------------
//  Beschreibung:
//      Lookup table mapping token ids (0..vocab_size-1) to dense vectors of
//      width d_model. Each encoder/decoder stack owns its own table; the
//      table is immutable during inference. Ids outside the vocabulary are
//      reported as errors instead of panicking on the row access.
// ===========================================================================

use bincode::{Decode, Encode};
use ndarray::{s, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::math::normal_matrix;

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Embedding {
    /// Dimension: [vocab_size, embedding_dim]
    #[bincode(with_serde)]
    pub token_embeddings: Array2<f32>,
}

impl Embedding {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, i_vocab_size: usize, i_embedding_dim: usize) -> Self {
        Embedding {
            token_embeddings: normal_matrix(rng, (i_vocab_size, i_embedding_dim), 0.02),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.token_embeddings.nrows()
    }

    pub fn embedding_dim(&self) -> usize {
        self.token_embeddings.ncols()
    }

    pub fn parameter_count(&self) -> usize {
        self.token_embeddings.len()
    }

    pub fn check_shape(&self, context: &'static str, i_vocab_size: usize, i_dim: usize) -> ModelResult<()> {
        if self.token_embeddings.dim() != (i_vocab_size, i_dim) {
            return Err(ModelError::shape_mismatch(
                context,
                (i_vocab_size, i_dim),
                self.token_embeddings.dim(),
            ));
        }
        Ok(())
    }

    /// Gathers one row per token id: result shape [seq_len, embedding_dim].
    pub fn lookup(&self, v_ids: ArrayView1<'_, usize>) -> ModelResult<Array2<f32>> {
        let i_vocab = self.vocab_size();
        let mut m_out = Array2::<f32>::zeros((v_ids.len(), self.embedding_dim()));
        for (mut row, &i_id) in m_out.rows_mut().into_iter().zip(v_ids.iter()) {
            if i_id >= i_vocab {
                return Err(ModelError::TokenOutOfRange { id: i_id, vocab_size: i_vocab });
            }
            row.assign(&self.token_embeddings.row(i_id));
        }
        Ok(m_out)
    }

    /// Stack input: embedding · sqrt(d_model) + positional rows 0..seq_len.
    pub fn embed_with_positions(
        &self,
        v_ids: ArrayView1<'_, usize>,
        m_positional: &Array2<f32>,
    ) -> ModelResult<Array2<f32>> {
        let i_len = v_ids.len();
        if i_len > m_positional.nrows() {
            return Err(ModelError::SequenceTooLong {
                actual: i_len,
                max: m_positional.nrows(),
            });
        }
        if m_positional.ncols() != self.embedding_dim() {
            return Err(ModelError::shape_mismatch(
                "positional table width",
                self.embedding_dim(),
                m_positional.ncols(),
            ));
        }
        let scale = (self.embedding_dim() as f32).sqrt();
        let mut m_x = self.lookup(v_ids)?;
        m_x.mapv_inplace(|x| x * scale);
        m_x += &m_positional.slice(s![..i_len, ..]);
        Ok(m_x)
    }
}
