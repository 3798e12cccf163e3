// =============================================
// lib.rs
// =============================================
pub mod config;
pub mod error;
pub mod math;

pub mod embeddings;
pub mod feed_forward;
pub mod layer_dense;
pub mod layer_norm;
pub mod layer_pos_encoding;
pub mod masks;
pub mod multi_head_attention;

pub mod decoder;
pub mod encoder;
pub mod transformer;

pub mod checkpoint;
pub mod normalise;
pub mod tokenize;
pub mod translator;

// Re-export key structs for easier access
pub use config::{ModelConfig, SpecialTokens, TranslatorConfig};
pub use decoder::AttentionWeights;
pub use error::{ModelError, ModelResult};
pub use normalise::normalise_text;
pub use tokenize::{CharVocab, TokenCodec};
pub use transformer::{Seq2SeqModel, Transformer, TransformerOutput};
pub use translator::{Termination, Translation, Translator};
