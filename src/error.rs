// ===========================================================================
//  Datei:        error.rs
//  Projekt:      chartrans – Character-Level Transformer Translator
//  Modul:        Error taxonomy
// ---------------------------------------------------------------------------
//  Configuration errors are raised at construction, shape errors at call
//  time. Collaborator failures (vocabulary files, checkpoints) pass through
//  as Io/Encode/Decode without being rewritten.
// ===========================================================================

use thiserror::Error;

/// Result alias used throughout the library.
pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("d_model {d_model} must be divisible by number of heads {num_heads}")]
    InvalidHeadDimension { d_model: usize, num_heads: usize },

    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Batch size must be 1 for single-request inference, got {0}")]
    BatchSize(usize),

    #[error("Sequence length {actual} exceeds maximum position {max}")]
    SequenceTooLong { actual: usize, max: usize },

    #[error("Token id {id} out of range for vocabulary of size {vocab_size}")]
    TokenOutOfRange { id: usize, vocab_size: usize },

    #[error("No finite value in {0}")]
    NonFinite(&'static str),

    #[error("Vocabulary error: {0}")]
    Vocabulary(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),
}

impl ModelError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn shape_mismatch(
        context: &'static str,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            context,
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }
}
