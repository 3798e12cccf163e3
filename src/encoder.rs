// =============================================
// encoder.rs
// =============================================
use bincode::{Decode, Encode};
use ndarray::{Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    config::ModelConfig,
    embeddings::Embedding,
    error::{ModelError, ModelResult},
    feed_forward::FeedForward,
    layer_norm::LayerNorm,
    layer_pos_encoding::PositionalTable,
    math::dropout,
    multi_head_attention::MultiHeadAttention,
};

/// Post-norm encoder layer: self-attention and feed-forward, each followed by
/// dropout, residual add and layer normalisation.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct EncoderLayer {
    pub mha: MultiHeadAttention,
    pub ffn: FeedForward,
    pub layernorm1: LayerNorm,
    pub layernorm2: LayerNorm,
    pub f_dropout: f32,
}

impl EncoderLayer {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, config: &ModelConfig) -> ModelResult<Self> {
        Ok(EncoderLayer {
            mha: MultiHeadAttention::new(rng, config.d_model, config.num_heads)?,
            ffn: FeedForward::new(rng, config.d_model, config.dff),
            layernorm1: LayerNorm::new(config.d_model, config.layer_norm_epsilon),
            layernorm2: LayerNorm::new(config.d_model, config.layer_norm_epsilon),
            f_dropout: config.dropout_rate,
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.mha.parameter_count()
            + self.ffn.parameter_count()
            + self.layernorm1.parameter_count()
            + self.layernorm2.parameter_count()
    }

    pub fn check_geometry(&self, config: &ModelConfig) -> ModelResult<()> {
        self.mha.check_geometry(config.d_model, config.num_heads)?;
        self.ffn.check_geometry(config.d_model, config.dff)?;
        self.layernorm1.check_width("encoder layernorm1", config.d_model)?;
        self.layernorm2.check_width("encoder layernorm2", config.d_model)
    }

    pub fn forward(
        &self,
        m_x: &Array2<f32>,
        padding_mask: Option<&Array2<f32>>,
        training: bool,
    ) -> ModelResult<Array2<f32>> {
        let (m_attn, _) = self.mha.forward(m_x, m_x, m_x, padding_mask)?;
        let m_attn = dropout(m_attn, self.f_dropout, training);
        let m_out1 = self.layernorm1.normalize(&(m_x + &m_attn))?;

        let m_ffn = self.ffn.forward(&m_out1)?;
        let m_ffn = dropout(m_ffn, self.f_dropout, training);
        self.layernorm2.normalize(&(m_out1 + &m_ffn))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Encoder {
    pub i_d_model: usize,
    pub embedding: Embedding,
    /// Fixed sinusoidal table [max_position, d_model], never mutated.
    pub pos_encoding: PositionalTable,
    pub enc_layers: Vec<EncoderLayer>,
    pub f_dropout: f32,
}

impl Encoder {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, config: &ModelConfig) -> ModelResult<Self> {
        let enc_layers = (0..config.num_layers)
            .map(|_| EncoderLayer::new(rng, config))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Encoder {
            i_d_model: config.d_model,
            embedding: Embedding::new(rng, config.input_vocab_size, config.d_model),
            pos_encoding: PositionalTable::new(config.max_position, config.d_model),
            enc_layers,
            f_dropout: config.dropout_rate,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.enc_layers.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.embedding.parameter_count()
            + self.enc_layers.iter().map(|l| l.parameter_count()).sum::<usize>()
    }

    /// Every stored dimension agrees with `config`.
    pub fn check_geometry(&self, config: &ModelConfig) -> ModelResult<()> {
        if self.i_d_model != config.d_model {
            return Err(ModelError::shape_mismatch("encoder d_model", config.d_model, self.i_d_model));
        }
        if self.num_layers() != config.num_layers {
            return Err(ModelError::shape_mismatch(
                "encoder layer count",
                config.num_layers,
                self.num_layers(),
            ));
        }
        self.embedding
            .check_shape("encoder embedding", config.input_vocab_size, config.d_model)?;
        let pos_dim = (self.pos_encoding.max_position(), self.pos_encoding.d_model());
        if pos_dim != (config.max_position, config.d_model) {
            return Err(ModelError::shape_mismatch(
                "encoder positional table",
                (config.max_position, config.d_model),
                pos_dim,
            ));
        }
        self.enc_layers
            .iter()
            .try_for_each(|layer| layer.check_geometry(config))
    }

    /// Source ids [seq] -> encoded representation [seq, d_model].
    pub fn forward(
        &self,
        v_ids: ArrayView1<'_, usize>,
        padding_mask: Option<&Array2<f32>>,
        training: bool,
    ) -> ModelResult<Array2<f32>> {
        let m_x = self.embedding.embed_with_positions(v_ids, self.pos_encoding.table())?;
        let mut m_x = dropout(m_x, self.f_dropout, training);
        for layer in &self.enc_layers {
            m_x = layer.forward(&m_x, padding_mask, training)?;
        }
        Ok(m_x)
    }
}
