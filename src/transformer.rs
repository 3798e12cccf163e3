// =============================================
// transformer.rs
// =============================================
use std::sync::Arc;

use bincode::{Decode, Encode};
use ndarray::{Array2, ArrayView1};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    config::{ModelConfig, PAD_ID},
    decoder::{AttentionWeights, Decoder},
    encoder::Encoder,
    error::{ModelError, ModelResult},
    layer_dense::Dense,
    masks::{combined_decoder_mask, padding_mask},
};

/// Result of one full encoder-decoder pass.
#[derive(Debug, Clone)]
pub struct TransformerOutput {
    /// Unnormalised scores, shape [target_len, target_vocab_size].
    pub logits: Array2<f32>,
    pub attention: AttentionWeights,
}

/// The contract the greedy translator drives: score every target position
/// given a source sequence and a target prefix, both of shape [1, len].
pub trait Seq2SeqModel: Sync {
    fn forward(
        &self,
        source: &Array2<usize>,
        target: &Array2<usize>,
        training: bool,
    ) -> ModelResult<TransformerOutput>;

    /// Longest sequence either side accepts.
    fn max_position(&self) -> usize;

    fn pad_id(&self) -> usize;
}

impl<T: Seq2SeqModel + ?Sized> Seq2SeqModel for &T {
    fn forward(
        &self,
        source: &Array2<usize>,
        target: &Array2<usize>,
        training: bool,
    ) -> ModelResult<TransformerOutput> {
        (**self).forward(source, target, training)
    }

    fn max_position(&self) -> usize {
        (**self).max_position()
    }

    fn pad_id(&self) -> usize {
        (**self).pad_id()
    }
}

impl<T: Seq2SeqModel + Send + ?Sized> Seq2SeqModel for Arc<T> {
    fn forward(
        &self,
        source: &Array2<usize>,
        target: &Array2<usize>,
        training: bool,
    ) -> ModelResult<TransformerOutput> {
        (**self).forward(source, target, training)
    }

    fn max_position(&self) -> usize {
        (**self).max_position()
    }

    fn pad_id(&self) -> usize {
        (**self).pad_id()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct Transformer {
    pub config: ModelConfig,
    pub i_pad: usize,
    pub encoder: Encoder,
    pub decoder: Decoder,
    pub final_layer: Dense, // [d_model, target_vocab]
}

impl Transformer {
    /// Builds a freshly initialised parameter set. Real weights are populated
    /// afterwards from a checkpoint.
    pub fn new(config: ModelConfig) -> ModelResult<Self> {
        Self::with_pad_id(config, PAD_ID)
    }

    pub fn with_pad_id(config: ModelConfig, i_pad: usize) -> ModelResult<Self> {
        config.validate()?;
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let encoder = Encoder::new(&mut rng, &config)?;
        let decoder = Decoder::new(&mut rng, &config)?;
        let final_layer = Dense::new(&mut rng, config.d_model, config.target_vocab_size);
        let transformer = Transformer {
            config,
            i_pad,
            encoder,
            decoder,
            final_layer,
        };
        tracing::info!(
            layers = transformer.config.num_layers,
            d_model = transformer.config.d_model,
            heads = transformer.config.num_heads,
            parameters = transformer.parameter_count(),
            "transformer constructed"
        );
        Ok(transformer)
    }

    pub fn parameter_count(&self) -> usize {
        self.encoder.parameter_count()
            + self.decoder.parameter_count()
            + self.final_layer.parameter_count()
    }

    /// Walks every layer and compares the stored parameter shapes (and head
    /// split) with `config`. Run after weights come from outside.
    pub fn check_geometry(&self) -> ModelResult<()> {
        self.config.validate()?;
        self.encoder.check_geometry(&self.config)?;
        self.decoder.check_geometry(&self.config)?;
        self.final_layer
            .check_shape("final layer", self.config.d_model, self.config.target_vocab_size)
    }

    pub fn network_description(&self) -> String {
        format!(
            "Encoder(Embedding {}x{}, {} x EncoderLayer), Decoder(Embedding {}x{}, {} x DecoderLayer), Dense {}x{}",
            self.encoder.embedding.vocab_size(),
            self.encoder.embedding.embedding_dim(),
            self.encoder.num_layers(),
            self.decoder.embedding.vocab_size(),
            self.decoder.embedding.embedding_dim(),
            self.decoder.num_layers(),
            self.final_layer.input_dim(),
            self.final_layer.output_dim(),
        )
    }

    /// Encoder padding mask (also used for cross-attention) and the decoder's
    /// combined look-ahead + target padding mask.
    pub fn create_masks(
        &self,
        v_source: ArrayView1<'_, usize>,
        v_target: ArrayView1<'_, usize>,
    ) -> (Array2<f32>, Array2<f32>) {
        let padding = padding_mask(v_source, self.i_pad);
        let look_ahead = combined_decoder_mask(v_target, self.i_pad);
        (padding, look_ahead)
    }

    fn single_row<'a>(m_ids: &'a Array2<usize>) -> ModelResult<ArrayView1<'a, usize>> {
        if m_ids.nrows() != 1 {
            return Err(ModelError::BatchSize(m_ids.nrows()));
        }
        Ok(m_ids.row(0))
    }
}

impl Seq2SeqModel for Transformer {
    fn forward(
        &self,
        source: &Array2<usize>,
        target: &Array2<usize>,
        training: bool,
    ) -> ModelResult<TransformerOutput> {
        let v_source = Self::single_row(source)?;
        let v_target = Self::single_row(target)?;

        let (padding, look_ahead) = self.create_masks(v_source, v_target);

        let m_enc = self.encoder.forward(v_source, Some(&padding), training)?;
        let (m_dec, attention) =
            self.decoder
                .forward(v_target, &m_enc, Some(&look_ahead), Some(&padding), training)?;
        let logits = self.final_layer.forward(&m_dec)?;

        Ok(TransformerOutput { logits, attention })
    }

    fn max_position(&self) -> usize {
        self.config.max_position
    }

    fn pad_id(&self) -> usize {
        self.i_pad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            num_layers: 2,
            d_model: 16,
            num_heads: 4,
            dff: 32,
            dropout_rate: 0.1,
            max_position: 20,
            input_vocab_size: 12,
            target_vocab_size: 15,
            layer_norm_epsilon: 1e-6,
            seed: Some(1234),
        }
    }

    fn row(v: &[usize]) -> Array2<usize> {
        Array2::from_shape_vec((1, v.len()), v.to_vec()).unwrap()
    }

    #[test]
    fn logits_cover_every_target_position() {
        let model = Transformer::new(tiny_config()).unwrap();
        let out = model.forward(&row(&[1, 9, 9, 2]), &row(&[1, 4, 5]), false).unwrap();
        assert_eq!(out.logits.dim(), (3, 15));
        assert_eq!(out.attention.len(), 4);
        assert!(out.logits.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn seeded_construction_is_reproducible() {
        let a = Transformer::new(tiny_config()).unwrap();
        let b = Transformer::new(tiny_config()).unwrap();
        let src = row(&[1, 3, 2]);
        let tgt = row(&[1, 7]);
        let out_a = a.forward(&src, &tgt, false).unwrap();
        let out_b = b.forward(&src, &tgt, false).unwrap();
        assert_eq!(out_a.logits, out_b.logits);
    }

    #[test]
    fn batch_other_than_one_rejected() {
        let model = Transformer::new(tiny_config()).unwrap();
        let batch = Array2::from_shape_vec((2, 2), vec![1usize, 2, 1, 2]).unwrap();
        assert!(matches!(
            model.forward(&batch, &row(&[1]), false),
            Err(ModelError::BatchSize(2))
        ));
        assert!(matches!(
            model.forward(&row(&[1, 2]), &batch, false),
            Err(ModelError::BatchSize(2))
        ));
    }

    #[test]
    fn invalid_config_prevents_construction() {
        let mut config = tiny_config();
        config.num_heads = 3;
        assert!(matches!(
            Transformer::new(config),
            Err(ModelError::InvalidHeadDimension { .. })
        ));
    }

    #[test]
    fn fresh_model_has_consistent_geometry() {
        let mut model = Transformer::new(tiny_config()).unwrap();
        assert!(model.check_geometry().is_ok());

        model.decoder.dec_layers[1].layernorm3.gamma = Array2::ones((1, 8));
        assert!(matches!(
            model.check_geometry(),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn out_of_vocab_source_is_error() {
        let model = Transformer::new(tiny_config()).unwrap();
        assert!(matches!(
            model.forward(&row(&[1, 12, 2]), &row(&[1]), false),
            Err(ModelError::TokenOutOfRange { id: 12, .. })
        ));
    }

    #[test]
    fn earlier_positions_ignore_later_target_tokens() {
        let model = Transformer::new(tiny_config()).unwrap();
        let src = row(&[1, 3, 4, 2]);
        let short = model.forward(&src, &row(&[1, 5]), false).unwrap();
        let long = model.forward(&src, &row(&[1, 5, 8, 9]), false).unwrap();
        for j in 0..15 {
            assert!((short.logits[(1, j)] - long.logits[(1, j)]).abs() < 1e-4);
        }
    }

    #[test]
    fn training_mode_applies_dropout() {
        let mut config = tiny_config();
        config.dropout_rate = 0.5;
        let model = Transformer::new(config).unwrap();
        let src = row(&[1, 3, 4, 2]);
        let tgt = row(&[1, 5, 6]);
        let eval_a = model.forward(&src, &tgt, false).unwrap();
        let eval_b = model.forward(&src, &tgt, false).unwrap();
        assert_eq!(eval_a.logits, eval_b.logits);
        let train = model.forward(&src, &tgt, true).unwrap();
        assert_ne!(train.logits, eval_a.logits);
    }
}
