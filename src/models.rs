//! Popular tokenization models, including:
//!
//! - WordPiece
//! - Byte Pair Encoding or BPE

use std::fmt::Debug;
use std::ops::Range;

use crate::decoders::Decoder;
use crate::vocab::{TokenId, Vocab};

mod bpe;
mod wordpiece;

pub use bpe::{byte_to_char, char_to_byte, merge_pairs_from_lines, Bpe, BpeError, BpeOptions};
pub use wordpiece::{WordPiece, WordPieceOptions};

/// Trait for tokenization models which convert words (or other string pieces)
/// into sequences of token IDs.
pub trait Model: Debug + Send + Sync {
    /// Encode a string piece into a sequence of token IDs.
    ///
    /// `on_token` is invoked for each token with the byte range of `word`
    /// the token was produced from and the token ID. An empty `word` produces
    /// no tokens.
    fn encode_with_offsets(&self, word: &str, on_token: &mut dyn FnMut(Range<usize>, TokenId));

    /// Return the model's vocabulary.
    fn vocab(&self) -> &Vocab;

    /// Return the decoder that joins this model's tokens back into text,
    /// used when the tokenizer configuration does not specify one.
    ///
    /// If `None`, tokens are joined with spaces.
    fn default_decoder(&self) -> Option<Box<dyn Decoder>>;

    /// Encode a string piece and return `(byte_range, token_id)` pairs.
    fn encode(&self, word: &str) -> Vec<(Range<usize>, TokenId)> {
        let mut tokens = Vec::new();
        self.encode_with_offsets(word, &mut |range, id| tokens.push((range, id)));
        tokens
    }

    /// Look up the ID of a token in the vocabulary.
    fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.vocab().token_to_id(token)
    }

    /// Look up the string of a token ID in the vocabulary.
    fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.vocab().id_to_token(id)
    }
}
