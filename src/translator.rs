// ===========================================================================
//  Datei:        translator.rs
//  Projekt:      chartrans – Character-Level Transformer Translator
//  Modul:        Greedy autoregressive translation
// ---------------------------------------------------------------------------
//  Ablauf
//  ------
//      INIT      source ids -> [1, n] tensor, output buffer = [START]
//      DECODING  forward(source, prefix), argmax over the last position,
//                append; stop on END or after max_length steps
//      DONE      one more forward pass over the output without its last
//                token to collect the attention weights for inspection
//
//  The model is only read, so one instance can serve several requests at
//  once; each request owns its buffer and masks.
// ===========================================================================

use ndarray::Array2;
use rayon::prelude::*;

use crate::{
    config::TranslatorConfig,
    decoder::AttentionWeights,
    error::{ModelError, ModelResult},
    math::argmax,
    tokenize::TokenCodec,
    transformer::Seq2SeqModel,
};

/// Why decoding stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The model produced the end token.
    EndToken,
    /// `max_length` steps ran without an end token; the output is truncated.
    LengthCap,
}

#[derive(Debug, Clone)]
pub struct Translation {
    /// Target ids including the start token (and the end token if produced).
    pub tokens: Vec<usize>,
    pub termination: Termination,
    /// Weights of the final pass over `tokens[..len-1]`.
    pub attention: AttentionWeights,
}

impl Translation {
    pub fn is_truncated(&self) -> bool {
        self.termination == Termination::LengthCap
    }

    /// Number of generated tokens (start token excluded).
    pub fn steps(&self) -> usize {
        self.tokens.len().saturating_sub(1)
    }
}

/// Output buffer pre-sized to `max_length + 1` slots with an explicit fill
/// counter; it never reallocates during decoding.
#[derive(Debug, Clone)]
pub struct DecodeBuffer {
    v_slots: Vec<usize>,
    i_len: usize,
}

impl DecodeBuffer {
    pub fn new(i_max_length: usize, i_start: usize, i_fill: usize) -> Self {
        let mut v_slots = vec![i_fill; i_max_length + 1];
        v_slots[0] = i_start;
        DecodeBuffer { v_slots, i_len: 1 }
    }

    pub fn len(&self) -> usize {
        self.i_len
    }

    pub fn is_empty(&self) -> bool {
        self.i_len == 0
    }

    pub fn is_full(&self) -> bool {
        self.i_len == self.v_slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.v_slots.len()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.v_slots[..self.i_len]
    }

    pub fn push(&mut self, i_id: usize) -> ModelResult<()> {
        if self.is_full() {
            return Err(ModelError::SequenceTooLong {
                actual: self.i_len + 1,
                max: self.v_slots.len(),
            });
        }
        self.v_slots[self.i_len] = i_id;
        self.i_len += 1;
        Ok(())
    }

    /// First `i_len` tokens as a [1, i_len] model input.
    pub fn prefix_row(&self, i_len: usize) -> ModelResult<Array2<usize>> {
        let i_len = i_len.min(self.i_len);
        Array2::from_shape_vec((1, i_len), self.v_slots[..i_len].to_vec())
            .map_err(|e| ModelError::shape_mismatch("decode buffer", (1, i_len), e.to_string()))
    }

    pub fn into_tokens(mut self) -> Vec<usize> {
        self.v_slots.truncate(self.i_len);
        self.v_slots
    }
}

/// Greedy decoder over any [`Seq2SeqModel`]; the model and special ids are
/// injected, nothing is global.
pub struct Translator<M: Seq2SeqModel> {
    model: M,
    config: TranslatorConfig,
}

impl<M: Seq2SeqModel> Translator<M> {
    pub fn new(model: M, config: TranslatorConfig) -> ModelResult<Self> {
        config.validate(model.max_position())?;
        if config.special.pad != model.pad_id() {
            return Err(ModelError::invalid_config(format!(
                "translator pad id {} differs from model pad id {}",
                config.special.pad,
                model.pad_id()
            )));
        }
        Ok(Translator { model, config })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &TranslatorConfig {
        &self.config
    }

    /// Translates one source sequence (already wrapped with start/end ids).
    pub fn translate(&self, v_source: &[usize]) -> ModelResult<Translation> {
        let special = self.config.special;
        let i_max_length = self.config.max_length;

        // INIT
        if v_source.len() > self.model.max_position() {
            return Err(ModelError::SequenceTooLong {
                actual: v_source.len(),
                max: self.model.max_position(),
            });
        }
        let a_source = Array2::from_shape_vec((1, v_source.len()), v_source.to_vec())
            .map_err(|e| ModelError::shape_mismatch("source", (1, v_source.len()), e.to_string()))?;
        let mut buffer = DecodeBuffer::new(i_max_length, special.start, special.pad);
        let mut termination = Termination::LengthCap;

        // DECODING
        for i_step in 0..i_max_length {
            let a_prefix = buffer.prefix_row(buffer.len())?;
            let output = self.model.forward(&a_source, &a_prefix, false)?;

            let i_last_row = output.logits.nrows().checked_sub(1).ok_or_else(|| {
                ModelError::shape_mismatch("decoder logits rows", buffer.len(), 0)
            })?;
            let i_next = argmax(output.logits.row(i_last_row))
                .ok_or(ModelError::NonFinite("decoder logits"))?;

            buffer.push(i_next)?;
            tracing::debug!(step = i_step + 1, token = i_next, "decode step");

            if i_next == special.end {
                termination = Termination::EndToken;
                break;
            }
        }

        // DONE
        debug_assert!(buffer.len() <= i_max_length + 1);
        let a_final = buffer.prefix_row(buffer.len() - 1)?;
        let attention = self.model.forward(&a_source, &a_final, false)?.attention;

        let tokens = buffer.into_tokens();
        match termination {
            Termination::EndToken => {
                tracing::info!(tokens = tokens.len(), "translation finished at end token")
            }
            Termination::LengthCap => tracing::warn!(
                tokens = tokens.len(),
                max_length = i_max_length,
                "translation truncated at length cap"
            ),
        }

        Ok(Translation {
            tokens,
            termination,
            attention,
        })
    }

    /// Text in, text out: encodes with `source_codec`, translates, decodes
    /// with `target_codec`. Collaborator errors are returned unchanged.
    pub fn translate_text<S, T>(
        &self,
        source_codec: &S,
        target_codec: &T,
        s_text: &str,
    ) -> ModelResult<(String, Translation)>
    where
        S: TokenCodec + ?Sized,
        T: TokenCodec + ?Sized,
    {
        let v_source = source_codec.encode(s_text)?;
        let translation = self.translate(&v_source)?;
        let s_out = target_codec.decode(&translation.tokens);
        Ok((s_out, translation))
    }

    /// Independent requests decoded in parallel over the shared model.
    pub fn translate_many(&self, v_sources: &[Vec<usize>]) -> Vec<ModelResult<Translation>> {
        v_sources
            .par_iter()
            .map(|v_source| self.translate(v_source))
            .collect()
    }
}
