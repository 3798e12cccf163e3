// =============================================
// decoder.rs
// =============================================
use bincode::{Decode, Encode};
use ndarray::{Array2, Array4, ArrayView1};
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

/// Attention weights of one forward pass, keyed `layer_{i}_self` and
/// `layer_{i}_cross` (i counted from 1), in ascending layer order.
///
/// Each tensor has shape [1, heads, Lq, Lk].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttentionWeights {
    entries: Vec<(String, Array4<f32>)>,
}

impl AttentionWeights {
    pub fn self_key(i_layer: usize) -> String {
        format!("layer_{}_self", i_layer + 1)
    }

    pub fn cross_key(i_layer: usize) -> String {
        format!("layer_{}_cross", i_layer + 1)
    }

    fn push(&mut self, s_name: String, weights: Array4<f32>) {
        self.entries.push((s_name, weights));
    }

    pub fn get(&self, s_name: &str) -> Option<&Array4<f32>> {
        self.entries
            .iter()
            .find(|(name, _)| name == s_name)
            .map(|(_, w)| w)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array4<f32>)> {
        self.entries.iter().map(|(name, w)| (name.as_str(), w))
    }
}

/// Output of one decoder layer: state plus (self, cross) attention weights.
pub type DecoderLayerOutput = (Array2<f32>, Array4<f32>, Array4<f32>);

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct DecoderLayer {
    pub mha1: MultiHeadAttention, // masked self-attention
    pub mha2: MultiHeadAttention, // cross-attention over the encoder output
    pub ffn: FeedForward,
    pub layernorm1: LayerNorm,
    pub layernorm2: LayerNorm,
    pub layernorm3: LayerNorm,
    pub f_dropout: f32,
}

impl DecoderLayer {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, config: &ModelConfig) -> ModelResult<Self> {
        Ok(DecoderLayer {
            mha1: MultiHeadAttention::new(rng, config.d_model, config.num_heads)?,
            mha2: MultiHeadAttention::new(rng, config.d_model, config.num_heads)?,
            ffn: FeedForward::new(rng, config.d_model, config.dff),
            layernorm1: LayerNorm::new(config.d_model, config.layer_norm_epsilon),
            layernorm2: LayerNorm::new(config.d_model, config.layer_norm_epsilon),
            layernorm3: LayerNorm::new(config.d_model, config.layer_norm_epsilon),
            f_dropout: config.dropout_rate,
        })
    }

    pub fn parameter_count(&self) -> usize {
        self.mha1.parameter_count()
            + self.mha2.parameter_count()
            + self.ffn.parameter_count()
            + self.layernorm1.parameter_count()
            + self.layernorm2.parameter_count()
            + self.layernorm3.parameter_count()
    }

    pub fn check_geometry(&self, config: &ModelConfig) -> ModelResult<()> {
        self.mha1.check_geometry(config.d_model, config.num_heads)?;
        self.mha2.check_geometry(config.d_model, config.num_heads)?;
        self.ffn.check_geometry(config.d_model, config.dff)?;
        self.layernorm1.check_width("decoder layernorm1", config.d_model)?;
        self.layernorm2.check_width("decoder layernorm2", config.d_model)?;
        self.layernorm3.check_width("decoder layernorm3", config.d_model)
    }

    pub fn forward(
        &self,
        m_x: &Array2<f32>,
        m_enc_output: &Array2<f32>,
        look_ahead_mask: Option<&Array2<f32>>,
        padding_mask: Option<&Array2<f32>>,
        training: bool,
    ) -> ModelResult<DecoderLayerOutput> {
        let (m_attn1, w_block1) = self.mha1.forward(m_x, m_x, m_x, look_ahead_mask)?;
        let m_attn1 = dropout(m_attn1, self.f_dropout, training);
        let m_out1 = self.layernorm1.normalize(&(&m_attn1 + m_x))?;

        // queries from the decoder state, keys/values from the encoder
        let (m_attn2, w_block2) =
            self.mha2
                .forward(&m_out1, m_enc_output, m_enc_output, padding_mask)?;
        let m_attn2 = dropout(m_attn2, self.f_dropout, training);
        let m_out2 = self.layernorm2.normalize(&(m_attn2 + &m_out1))?;

        let m_ffn = self.ffn.forward(&m_out2)?;
        let m_ffn = dropout(m_ffn, self.f_dropout, training);
        let m_out3 = self.layernorm3.normalize(&(m_ffn + &m_out2))?;

        Ok((m_out3, w_block1, w_block2))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Decoder {
    pub i_d_model: usize,
    pub embedding: Embedding,
    pub pos_encoding: PositionalTable,
    pub dec_layers: Vec<DecoderLayer>,
    pub f_dropout: f32,
}

impl Decoder {
    pub fn new<R: Rng + ?Sized>(rng: &mut R, config: &ModelConfig) -> ModelResult<Self> {
        let dec_layers = (0..config.num_layers)
            .map(|_| DecoderLayer::new(rng, config))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Decoder {
            i_d_model: config.d_model,
            embedding: Embedding::new(rng, config.target_vocab_size, config.d_model),
            pos_encoding: PositionalTable::new(config.max_position, config.d_model),
            dec_layers,
            f_dropout: config.dropout_rate,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.dec_layers.len()
    }

    pub fn parameter_count(&self) -> usize {
        self.embedding.parameter_count()
            + self.dec_layers.iter().map(|l| l.parameter_count()).sum::<usize>()
    }

    pub fn check_geometry(&self, config: &ModelConfig) -> ModelResult<()> {
        if self.i_d_model != config.d_model {
            return Err(ModelError::shape_mismatch("decoder d_model", config.d_model, self.i_d_model));
        }
        if self.num_layers() != config.num_layers {
            return Err(ModelError::shape_mismatch(
                "decoder layer count",
                config.num_layers,
                self.num_layers(),
            ));
        }
        self.embedding
            .check_shape("decoder embedding", config.target_vocab_size, config.d_model)?;
        let pos_dim = (self.pos_encoding.max_position(), self.pos_encoding.d_model());
        if pos_dim != (config.max_position, config.d_model) {
            return Err(ModelError::shape_mismatch(
                "decoder positional table",
                (config.max_position, config.d_model),
                pos_dim,
            ));
        }
        self.dec_layers
            .iter()
            .try_for_each(|layer| layer.check_geometry(config))
    }

    /// Target prefix [seq] -> decoder state [seq, d_model] plus all attention
    /// weights, layer index ascending.
    pub fn forward(
        &self,
        v_ids: ArrayView1<'_, usize>,
        m_enc_output: &Array2<f32>,
        look_ahead_mask: Option<&Array2<f32>>,
        padding_mask: Option<&Array2<f32>>,
        training: bool,
    ) -> ModelResult<(Array2<f32>, AttentionWeights)> {
        let mut attention = AttentionWeights::default();

        let m_x = self.embedding.embed_with_positions(v_ids, self.pos_encoding.table())?;
        let mut m_x = dropout(m_x, self.f_dropout, training);

        for (i_layer, layer) in self.dec_layers.iter().enumerate() {
            let (m_next, w_block1, w_block2) =
                layer.forward(&m_x, m_enc_output, look_ahead_mask, padding_mask, training)?;
            m_x = m_next;
            attention.push(AttentionWeights::self_key(i_layer), w_block1);
            attention.push(AttentionWeights::cross_key(i_layer), w_block2);
        }
        Ok((m_x, attention))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::{combined_decoder_mask, padding_mask};
    use ndarray::{s, Array1};
    use rand::{rngs::StdRng, SeedableRng};

    fn small_config() -> ModelConfig {
        ModelConfig {
            num_layers: 3,
            d_model: 16,
            num_heads: 2,
            dff: 32,
            dropout_rate: 0.1,
            max_position: 16,
            input_vocab_size: 20,
            target_vocab_size: 24,
            layer_norm_epsilon: 1e-6,
            seed: None,
        }
    }

    #[test]
    fn collects_weights_per_layer_in_order() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(9);
        let decoder = Decoder::new(&mut rng, &config).unwrap();
        let enc_out = crate::math::normal_matrix(&mut rng, (5, 16), 1.0);
        let target = Array1::from(vec![1usize, 4, 6]);
        let source = Array1::from(vec![1usize, 7, 7, 2, 0]);
        let la = combined_decoder_mask(target.view(), 0);
        let pad = padding_mask(source.view(), 0);

        let (out, attention) = decoder
            .forward(target.view(), &enc_out, Some(&la), Some(&pad), false)
            .unwrap();
        assert_eq!(out.dim(), (3, 16));
        assert_eq!(attention.len(), 6);
        let names: Vec<&str> = attention.names().collect();
        assert_eq!(
            names,
            vec![
                "layer_1_self",
                "layer_1_cross",
                "layer_2_self",
                "layer_2_cross",
                "layer_3_self",
                "layer_3_cross"
            ]
        );
        assert_eq!(attention.get("layer_2_self").unwrap().dim(), (1, 2, 3, 3));
        assert_eq!(attention.get("layer_3_cross").unwrap().dim(), (1, 2, 3, 5));
        assert!(attention.get("layer_4_self").is_none());
    }

    #[test]
    fn cross_attention_ignores_source_padding() {
        let config = small_config();
        let mut rng = StdRng::seed_from_u64(10);
        let decoder = Decoder::new(&mut rng, &config).unwrap();
        let enc_out = crate::math::normal_matrix(&mut rng, (4, 16), 1.0);
        let target = Array1::from(vec![1usize, 3]);
        let source = Array1::from(vec![1usize, 5, 2, 0]);
        let la = combined_decoder_mask(target.view(), 0);
        let pad = padding_mask(source.view(), 0);

        let (_, attention) = decoder
            .forward(target.view(), &enc_out, Some(&la), Some(&pad), false)
            .unwrap();
        for (_, w) in attention.iter().filter(|(name, _)| name.ends_with("cross")) {
            assert!(w.slice(s![0, .., .., 3]).iter().all(|&x| x.abs() < 1e-6));
        }
        for (_, w) in attention.iter().filter(|(name, _)| name.ends_with("self")) {
            // first target position sees only itself
            assert!((w[[0, 0, 0, 0]] - 1.0).abs() < 1e-5);
            assert!(w[[0, 1, 0, 1]].abs() < 1e-6);
        }
    }
}
