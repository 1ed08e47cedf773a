use std::collections::HashMap;
use std::ops::Range;

use super::Model;
use crate::decoders::{self, Decoder};
use crate::vocab::{TokenId, Vocab, VocabError};

/// WordPiece tokenizer [^1] used by BERT [^2] models.
///
/// [^1]: Schuster, Mike, and Kaisuke Nakajima. "Japanese and korean voice
///       search." 2012 IEEE international conference on acoustics, speech and signal
///       processing (ICASSP). IEEE, 2012. Accessed at
///       <https://static.googleusercontent.com/media/research.google.com/en//pubs/archive/37842.pdf>
///
/// [^2]: Devlin, Jacob, et al. "Bert: Pre-training of deep bidirectional
///       transformers for language understanding." arXiv preprint arXiv:1810.04805
///       (2018). <https://arxiv.org/abs/1810.04805>
#[derive(Clone, Debug)]
pub struct WordPiece {
    vocab: Vocab,
    unknown_id: TokenId,
    subword_prefix: String,
    max_word_len: usize,
}

/// Configuration for a [`WordPiece`] tokenizer.
#[derive(Debug, Default, Clone)]
pub struct WordPieceOptions {
    /// The maximum length, in chars, of words that can be tokenized. Any words
    /// longer than this are tokenized as the unknown token.
    ///
    /// Defaults to 100.
    pub max_word_len: Option<usize>,

    /// Prefix which marks a piece that continues the previous one.
    ///
    /// Defaults to `##`.
    pub subword_prefix: Option<String>,

    /// The token emitted for words that cannot be tokenized.
    ///
    /// Defaults to `[UNK]`.
    pub unk_token: Option<String>,
}

impl WordPiece {
    /// Construct a WordPiece tokenizer from a vocabulary.
    ///
    /// `vocab` is a mapping from word piece to token ID. Fails if the unknown
    /// token is not in the vocabulary.
    pub fn from_vocab(
        vocab: HashMap<String, TokenId>,
        options: WordPieceOptions,
    ) -> Result<WordPiece, VocabError> {
        let unk_token = options.unk_token.as_deref().unwrap_or("[UNK]");
        let vocab = Vocab::new(vocab).with_unknown_token(unk_token)?;
        let unknown_id = vocab.unknown_id().ok_or_else(|| {
            VocabError::MissingToken(unk_token.to_string())
        })?;

        Ok(WordPiece {
            vocab,
            unknown_id,
            subword_prefix: options.subword_prefix.unwrap_or_else(|| "##".to_string()),
            max_word_len: options.max_word_len.unwrap_or(100),
        })
    }

    /// Prefix which marks a piece that continues the previous one.
    pub fn subword_prefix(&self) -> &str {
        &self.subword_prefix
    }

    /// Split `word` into pieces, or return `None` if some part of it does not
    /// match any vocabulary entry.
    fn split_word(&self, word: &str) -> Option<Vec<(Range<usize>, TokenId)>> {
        let mut tmp_buf = String::with_capacity(word.len() + self.subword_prefix.len());
        let mut pieces = Vec::new();
        let mut offset = 0;

        while offset < word.len() {
            let remainder = &word[offset..];

            // Find longest prefix of `remainder` that is in the vocab.
            let mut len = remainder.len();
            let mut matched = None;
            while len > 0 {
                let prefix = if offset > 0 {
                    tmp_buf.clear();
                    tmp_buf.push_str(&self.subword_prefix);
                    tmp_buf.push_str(&remainder[..len]);
                    &tmp_buf[..]
                } else {
                    &remainder[..len]
                };

                if let Some(id) = self.vocab.token_to_id(prefix) {
                    matched = Some(id);
                    break;
                }

                let last_char_bytes = remainder[..len]
                    .chars()
                    .next_back()
                    .map(|ch| ch.len_utf8())
                    .unwrap_or(len);
                len -= last_char_bytes;
            }

            let id = matched?;
            pieces.push((offset..offset + len, id));
            offset += len;
        }

        Some(pieces)
    }
}

impl Model for WordPiece {
    fn encode_with_offsets(&self, word: &str, on_token: &mut dyn FnMut(Range<usize>, TokenId)) {
        if word.is_empty() {
            return;
        }

        if word.chars().count() > self.max_word_len {
            on_token(0..word.len(), self.unknown_id);
            return;
        }

        // If any part of the word fails to match, the whole word becomes a
        // single unknown token.
        match self.split_word(word) {
            Some(pieces) => {
                for (range, id) in pieces {
                    on_token(range, id);
                }
            }
            None => on_token(0..word.len(), self.unknown_id),
        }
    }

    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn default_decoder(&self) -> Option<Box<dyn Decoder>> {
        Some(Box::new(decoders::WordPiece::new(
            self.subword_prefix.clone(),
            true,
        )))
    }
}
