// src/config.rs
// Central hyperparameters and special token ids (one place for all constants)

use std::{fs, path::Path};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

pub const NUM_LAYERS: usize = 4;
pub const D_MODEL: usize = 128;
pub const DFF: usize = 512;
pub const NUM_HEADS: usize = 8;
pub const DROPOUT_RATE: f32 = 0.1;
pub const MAX_TOKENS: usize = 128; // positional table rows and default decode cap
pub const LAYER_NORM_EPSILON: f32 = 1e-6;

pub const PAD_ID: usize = 0;
pub const START_ID: usize = 1;
pub const END_ID: usize = 2;

/// Ids the tokenizers reserve for padding and sequence delimiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct SpecialTokens {
    pub pad: usize,
    pub start: usize,
    pub end: usize,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        SpecialTokens {
            pad: PAD_ID,
            start: START_ID,
            end: END_ID,
        }
    }
}

impl SpecialTokens {
    pub fn is_special(&self, i_id: usize) -> bool {
        i_id == self.pad || i_id == self.start || i_id == self.end
    }
}

/// Shape and regularisation hyperparameters of the encoder-decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct ModelConfig {
    pub num_layers: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub dff: usize,
    pub dropout_rate: f32,
    #[serde(default = "default_max_position")]
    pub max_position: usize,
    pub input_vocab_size: usize,
    pub target_vocab_size: usize,
    #[serde(default = "default_epsilon")]
    pub layer_norm_epsilon: f32,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_max_position() -> usize {
    MAX_TOKENS
}

fn default_epsilon() -> f32 {
    LAYER_NORM_EPSILON
}

impl ModelConfig {
    /// Reference hyperparameters: 4 layers, d_model 128, 8 heads, dff 512.
    pub fn reference(i_input_vocab: usize, i_target_vocab: usize) -> Self {
        ModelConfig {
            num_layers: NUM_LAYERS,
            d_model: D_MODEL,
            num_heads: NUM_HEADS,
            dff: DFF,
            dropout_rate: DROPOUT_RATE,
            max_position: MAX_TOKENS,
            input_vocab_size: i_input_vocab,
            target_vocab_size: i_target_vocab,
            layer_norm_epsilon: LAYER_NORM_EPSILON,
            seed: None,
        }
    }

    pub fn from_json_file(p_path: impl AsRef<Path>) -> ModelResult<Self> {
        let s_json = fs::read_to_string(p_path.as_ref())?;
        let config: ModelConfig = serde_json::from_str(&s_json)
            .map_err(|e| ModelError::invalid_config(format!("{}: {e}", p_path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.num_heads
    }

    pub fn validate(&self) -> ModelResult<()> {
        if self.num_layers == 0 {
            return Err(ModelError::invalid_config("num_layers must be > 0"));
        }
        if self.d_model == 0 || self.dff == 0 {
            return Err(ModelError::invalid_config("d_model and dff must be > 0"));
        }
        if self.num_heads == 0 {
            return Err(ModelError::invalid_config("num_heads must be > 0"));
        }
        if self.d_model % self.num_heads != 0 {
            return Err(ModelError::InvalidHeadDimension {
                d_model: self.d_model,
                num_heads: self.num_heads,
            });
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(ModelError::invalid_config("dropout_rate must be in [0, 1)"));
        }
        if self.max_position == 0 {
            return Err(ModelError::invalid_config("max_position must be > 0"));
        }
        if self.input_vocab_size == 0 || self.target_vocab_size == 0 {
            return Err(ModelError::invalid_config("vocabulary sizes must be > 0"));
        }
        if self.layer_norm_epsilon <= 0.0 {
            return Err(ModelError::invalid_config("layer_norm_epsilon must be > 0"));
        }
        Ok(())
    }
}

/// Decoding limits for the greedy translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub max_length: usize,
    pub special: SpecialTokens,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        TranslatorConfig {
            max_length: MAX_TOKENS,
            special: SpecialTokens::default(),
        }
    }
}

impl TranslatorConfig {
    /// The decoder consumes at most `max_length` positions, so the cap may not
    /// exceed the positional table.
    pub fn validate(&self, i_max_position: usize) -> ModelResult<()> {
        if self.max_length == 0 {
            return Err(ModelError::invalid_config("max_length must be > 0"));
        }
        if self.max_length > i_max_position {
            return Err(ModelError::invalid_config(format!(
                "max_length {} exceeds max_position {}",
                self.max_length, i_max_position
            )));
        }
        let s = self.special;
        if s.pad == s.start || s.pad == s.end || s.start == s.end {
            return Err(ModelError::invalid_config("special token ids must be distinct"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_config_is_valid() {
        let config = ModelConfig::reference(21128, 8000);
        assert!(config.validate().is_ok());
        assert_eq!(config.head_dim(), 16);
    }

    #[test]
    fn non_divisible_heads_rejected() {
        let mut config = ModelConfig::reference(10, 10);
        config.num_heads = 7;
        assert!(matches!(
            config.validate(),
            Err(ModelError::InvalidHeadDimension { d_model: 128, num_heads: 7 })
        ));
    }

    #[test]
    fn json_defaults_fill_optional_fields() {
        let s_json = r#"{
            "num_layers": 2, "d_model": 32, "num_heads": 4, "dff": 64,
            "dropout_rate": 0.1, "input_vocab_size": 50, "target_vocab_size": 60
        }"#;
        let config: ModelConfig = serde_json::from_str(s_json).unwrap();
        assert_eq!(config.max_position, MAX_TOKENS);
        assert_eq!(config.layer_norm_epsilon, LAYER_NORM_EPSILON);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn translator_limits() {
        let config = TranslatorConfig::default();
        assert!(config.validate(MAX_TOKENS).is_ok());
        assert!(config.validate(64).is_err());

        let zero = TranslatorConfig { max_length: 0, ..config };
        assert!(zero.validate(MAX_TOKENS).is_err());

        let clash = TranslatorConfig {
            special: SpecialTokens { pad: 0, start: 1, end: 1 },
            ..config
        };
        assert!(clash.validate(MAX_TOKENS).is_err());
    }
}
