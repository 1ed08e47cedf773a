//! Decoders which join token strings back into text.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::models::char_to_byte;
use crate::vocab::TokenId;

/// Errors that can occur when decoding token IDs into text.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// The token ID is not in the vocabulary and the model has no unknown
    /// token to substitute for it.
    #[error("token id {0} is not in the vocabulary")]
    InvalidTokenId(TokenId),
}

/// A decoder joins the string form of a sequence of tokens into text.
pub trait Decoder: Debug + Send + Sync {
    fn decode(&self, tokens: &[&str]) -> String;
}

/// Join tokens with spaces. This is used when neither the tokenizer
/// configuration nor the model specify a decoder.
pub(crate) fn join_with_spaces(tokens: &[&str]) -> String {
    tokens.join(" ")
}

/// Remove spaces which the WordPiece decoder inserts before punctuation and
/// English contractions.
fn cleanup(text: &str) -> String {
    text.replace(" .", ".")
        .replace(" ?", "?")
        .replace(" !", "!")
        .replace(" ,", ",")
        .replace(" ' ", "'")
        .replace(" n't", "n't")
        .replace(" 'm", "'m")
        .replace(" do not", " don't")
        .replace(" 's", "'s")
        .replace(" 've", "'ve")
        .replace(" 're", "'re")
}

/// Decoder for WordPiece tokens.
///
/// Pieces starting with the continuation prefix are attached to the previous
/// piece with the prefix removed. Other pieces are separated by a space.
#[derive(Clone, Debug)]
pub struct WordPiece {
    prefix: String,
    cleanup: bool,
}

impl WordPiece {
    pub fn new(prefix: String, cleanup: bool) -> WordPiece {
        WordPiece { prefix, cleanup }
    }
}

impl Default for WordPiece {
    fn default() -> Self {
        WordPiece::new("##".to_string(), true)
    }
}

impl Decoder for WordPiece {
    fn decode(&self, tokens: &[&str]) -> String {
        let mut text = String::new();
        for (i, token) in tokens.iter().enumerate() {
            let piece = match token.strip_prefix(self.prefix.as_str()) {
                Some(rest) if i > 0 && !self.prefix.is_empty() => rest.to_string(),
                _ if i > 0 => format!(" {}", token),
                _ => token.to_string(),
            };
            if self.cleanup {
                text.push_str(&cleanup(&piece));
            } else {
                text.push_str(&piece);
            }
        }
        text
    }
}

/// Decoder for byte-level BPE tokens.
///
/// Each char of a token represents one byte, according to the mapping in
/// [`char_to_byte`]. Chars outside that mapping, such as those of added
/// tokens, are kept as-is. Byte sequences which are not valid UTF-8 are
/// replaced with U+FFFD.
#[derive(Clone, Debug)]
pub struct ByteLevel {
    char_to_byte: HashMap<char, u8>,
}

impl ByteLevel {
    pub fn new() -> ByteLevel {
        ByteLevel {
            char_to_byte: char_to_byte(),
        }
    }
}

impl Default for ByteLevel {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ByteLevel {
    fn decode(&self, tokens: &[&str]) -> String {
        let mut bytes = Vec::new();
        let mut buf = [0u8; 4];
        for ch in tokens.iter().flat_map(|token| token.chars()) {
            match self.char_to_byte.get(&ch) {
                Some(&byte) => bytes.push(byte),
                None => bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes()),
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Decoder for BPE models which mark the end of each word with a suffix.
///
/// The suffix is replaced with a space, except at the end of the text.
#[derive(Clone, Debug)]
pub struct Bpe {
    suffix: String,
}

impl Bpe {
    pub fn new(suffix: String) -> Bpe {
        Bpe { suffix }
    }
}

impl Decoder for Bpe {
    fn decode(&self, tokens: &[&str]) -> String {
        let last = tokens.len().saturating_sub(1);
        tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                let replacement = if i == last { "" } else { " " };
                token.replace(self.suffix.as_str(), replacement)
            })
            .collect()
    }
}
