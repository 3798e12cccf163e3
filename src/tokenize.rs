// tokenize.rs
// ============================================================================
// Hinweis: Character vocabulary loaded from a token-per-line file; encodes
//          text character by character and wraps it with start/end ids.
// ============================================================================

#![forbid(unsafe_code)]

use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::config::SpecialTokens;
use crate::error::{ModelError, ModelResult};

pub const S_UNK_CANDIDATES: [&str; 2] = ["[UNK]", "<unk>"];
const S_WORDPIECE_PREFIX: &str = "##";
const C_SPACE_MARKER: char = '\u{2581}'; // '▁'

/// The boundary between text and token ids used by the translator.
pub trait TokenCodec: Sync {
    /// Text -> ids wrapped as [start, .., end].
    fn encode(&self, s_text: &str) -> ModelResult<Vec<usize>>;

    /// Ids -> text; special ids are dropped.
    fn decode(&self, v_ids: &[usize]) -> String;

    fn vocab_size(&self) -> usize;

    fn token(&self, i_id: usize) -> Option<&str>;
}

#[derive(Clone, Debug)]
pub struct CharVocab {
    words: Vec<String>,
    encode: HashMap<String, usize>,
    unk: Option<usize>,
    special: SpecialTokens,
}

impl CharVocab {
    /// Line number = id. Blank lines keep their slot so ids stay aligned.
    pub fn from_tokens(words: Vec<String>, special: SpecialTokens) -> ModelResult<Self> {
        let i_vocab = words.len();
        for i_id in [special.pad, special.start, special.end] {
            if i_id >= i_vocab {
                return Err(ModelError::Vocabulary(format!(
                    "special id {i_id} outside vocabulary of size {i_vocab}"
                )));
            }
        }
        let mut encode: HashMap<String, usize> = HashMap::with_capacity(i_vocab);
        for (i_id, s_tok) in words.iter().enumerate() {
            if s_tok.is_empty() {
                continue;
            }
            // the first occurrence wins
            encode.entry(s_tok.clone()).or_insert(i_id);
        }
        let unk = S_UNK_CANDIDATES
            .iter()
            .find_map(|s_unk| encode.get(*s_unk).copied());
        Ok(Self {
            words,
            encode,
            unk,
            special,
        })
    }

    pub fn load(p_path: impl AsRef<Path>, special: SpecialTokens) -> ModelResult<Self> {
        let reader = BufReader::new(File::open(p_path.as_ref())?);
        let mut words: Vec<String> = Vec::new();
        for line in reader.lines() {
            let s_line = line?;
            // sentencepiece exports carry a tab-separated score column
            let s_tok = s_line.split('\t').next().unwrap_or("").trim_end_matches('\r');
            words.push(s_tok.to_string());
        }
        let vocab = Self::from_tokens(words, special)?;
        tracing::info!(
            path = %p_path.as_ref().display(),
            size = vocab.vocab_size(),
            "vocabulary loaded"
        );
        Ok(vocab)
    }

    pub fn unk_id(&self) -> Option<usize> {
        self.unk
    }

    pub fn special(&self) -> SpecialTokens {
        self.special
    }

    pub fn encode_token(&self, s_token: &str) -> Option<usize> {
        self.encode.get(s_token).copied()
    }

    /// Characters only, no start/end wrapping. Whitespace is skipped.
    pub fn encode_chars(&self, s_text: &str) -> ModelResult<Vec<usize>> {
        let mut v_ids = Vec::with_capacity(s_text.chars().count());
        let mut buf = [0u8; 4];
        for ch in s_text.chars().filter(|c| !c.is_whitespace()) {
            let s_ch: &str = ch.encode_utf8(&mut buf);
            match self.encode_token(s_ch).or(self.unk) {
                Some(i_id) => v_ids.push(i_id),
                None => {
                    return Err(ModelError::Vocabulary(format!(
                        "character {ch:?} not in vocabulary and no unknown token"
                    )))
                }
            }
        }
        Ok(v_ids)
    }
}

impl TokenCodec for CharVocab {
    fn encode(&self, s_text: &str) -> ModelResult<Vec<usize>> {
        let v_chars = self.encode_chars(s_text)?;
        let mut v_ids = Vec::with_capacity(v_chars.len() + 2);
        v_ids.push(self.special.start);
        v_ids.extend(v_chars);
        v_ids.push(self.special.end);
        Ok(v_ids)
    }

    fn decode(&self, v_ids: &[usize]) -> String {
        let mut s_out = String::new();
        for &i_id in v_ids {
            if self.special.is_special(i_id) {
                continue;
            }
            let Some(s_tok) = self.token(i_id) else {
                continue;
            };
            let s_tok = s_tok.strip_prefix(S_WORDPIECE_PREFIX).unwrap_or(s_tok);
            s_out.extend(s_tok.chars().map(|c| if c == C_SPACE_MARKER { ' ' } else { c }));
        }
        s_out.trim().to_string()
    }

    fn vocab_size(&self) -> usize {
        self.words.len()
    }

    fn token(&self, i_id: usize) -> Option<&str> {
        self.words.get(i_id).map(|s| s.as_str())
    }
}
