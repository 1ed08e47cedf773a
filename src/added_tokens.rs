//! Tokens added on top of a model's vocabulary, such as `[CLS]` or `<s>`.
//!
//! Added tokens always map to exactly one token. Tokens with
//! [`normalized`](AddedToken::normalized) unset are extracted from the raw
//! input. The others are extracted from the text produced by the
//! normalizer, and are themselves normalized before matching.

use std::collections::HashMap;
use std::ops::Range;

use aho_corasick::{AhoCorasick, BuildError, MatchKind};

use crate::normalizers::{NormalizedText, Normalizer};
use crate::vocab::TokenId;

/// A token which is matched literally in the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddedToken {
    pub id: TokenId,
    pub content: String,

    /// Special tokens are omitted when decoding with `skip_special_tokens`.
    pub special: bool,

    /// Only match the token when it is not part of a larger word.
    pub single_word: bool,

    /// Include whitespace before the token in its span.
    pub lstrip: bool,

    /// Include whitespace after the token in its span.
    pub rstrip: bool,

    /// Match the token against normalized text rather than the raw input.
    pub normalized: bool,
}

impl AddedToken {
    /// Create a non-special token with default matching options.
    pub fn new(id: TokenId, content: &str) -> AddedToken {
        AddedToken {
            id,
            content: content.to_string(),
            special: false,
            single_word: false,
            lstrip: false,
            rstrip: false,
            normalized: true,
        }
    }

    /// Create a special token with default matching options.
    pub fn special(id: TokenId, content: &str) -> AddedToken {
        AddedToken {
            special: true,
            normalized: false,
            ..AddedToken::new(id, content)
        }
    }
}

/// Part of an input produced by [`AddedVocabulary::split`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    /// Byte range of text that still needs to be tokenized.
    Text(Range<usize>),

    /// Byte range of an occurrence of an added token.
    Token(TokenId, Range<usize>),
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Finds the leftmost-longest occurrences of a subset of the added tokens.
#[derive(Clone, Debug, Default)]
struct Matcher {
    automaton: Option<AhoCorasick>,

    /// Index in [`AddedVocabulary::tokens`] of each pattern.
    tokens: Vec<usize>,
}

impl Matcher {
    fn new(patterns: Vec<(usize, String)>) -> Result<Matcher, BuildError> {
        let (tokens, patterns): (Vec<usize>, Vec<String>) = patterns
            .into_iter()
            .filter(|(_, pattern)| !pattern.is_empty())
            .unzip();
        let automaton = if patterns.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .match_kind(MatchKind::LeftmostLongest)
                    .build(&patterns)?,
            )
        };
        Ok(Matcher { automaton, tokens })
    }
}

/// Collection of [`AddedToken`]s.
#[derive(Clone, Debug, Default)]
pub struct AddedVocabulary {
    tokens: Vec<AddedToken>,
    by_content: HashMap<String, usize>,
    by_id: HashMap<TokenId, usize>,

    /// Matches tokens which are extracted from the raw input.
    raw: Matcher,

    /// Matches tokens which are extracted from normalized text.
    normalized: Matcher,
}

impl AddedVocabulary {
    /// Create a vocabulary of added tokens.
    ///
    /// `normalizer` is applied to the content of tokens which are matched
    /// against normalized text. It should be the normalizer of the tokenizer
    /// which uses the vocabulary.
    pub fn new(
        tokens: Vec<AddedToken>,
        normalizer: Option<&dyn Normalizer>,
    ) -> Result<AddedVocabulary, BuildError> {
        let by_content = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| (token.content.clone(), i))
            .collect();
        let by_id = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| (token.id, i))
            .collect();

        let (normalized, raw): (Vec<_>, Vec<_>) = tokens
            .iter()
            .enumerate()
            .partition(|(_, token)| token.normalized);
        let raw = raw
            .into_iter()
            .map(|(i, token)| (i, token.content.clone()))
            .collect();
        let normalized = normalized
            .into_iter()
            .map(|(i, token)| {
                let content = match normalizer {
                    Some(normalizer) => normalizer
                        .normalize(NormalizedText::new(&token.content, 0))
                        .as_str()
                        .to_string(),
                    None => token.content.clone(),
                };
                (i, content)
            })
            .collect();

        Ok(AddedVocabulary {
            raw: Matcher::new(raw)?,
            normalized: Matcher::new(normalized)?,
            tokens,
            by_content,
            by_id,
        })
    }

    /// Rebuild the vocabulary for use with a different normalizer.
    pub fn with_normalizer(
        &self,
        normalizer: Option<&dyn Normalizer>,
    ) -> Result<AddedVocabulary, BuildError> {
        Self::new(self.tokens.clone(), normalizer)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate over added tokens in the order they were added.
    pub fn iter(&self) -> impl Iterator<Item = &AddedToken> {
        self.tokens.iter()
    }

    pub fn get(&self, id: TokenId) -> Option<&AddedToken> {
        self.by_id.get(&id).map(|&i| &self.tokens[i])
    }

    pub fn token_to_id(&self, content: &str) -> Option<TokenId> {
        self.by_content.get(content).map(|&i| self.tokens[i].id)
    }

    pub fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.get(id).map(|token| token.content.as_str())
    }

    /// Return the IDs of all special tokens.
    pub fn special_ids(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.tokens
            .iter()
            .filter(|token| token.special)
            .map(|token| token.id)
    }

    /// Split raw input into runs of ordinary text and occurrences of tokens
    /// which are not normalized.
    pub(crate) fn split(&self, text: &str) -> Vec<Segment> {
        self.find(&self.raw, text)
    }

    /// Split normalized text into runs of ordinary text and occurrences of
    /// tokens which are normalized.
    pub(crate) fn split_normalized(&self, text: &str) -> Vec<Segment> {
        self.find(&self.normalized, text)
    }

    /// Split `text` using the tokens of `matcher`.
    ///
    /// At each position the longest matching token wins. A match of a
    /// `single_word` token inside a word is skipped. Empty text segments are
    /// omitted.
    fn find(&self, matcher: &Matcher, text: &str) -> Vec<Segment> {
        let Some(automaton) = &matcher.automaton else {
            return if text.is_empty() {
                Vec::new()
            } else {
                vec![Segment::Text(0..text.len())]
            };
        };

        let mut segments = Vec::new();
        let mut text_start = 0;

        for m in automaton.find_iter(text) {
            let token = &self.tokens[matcher.tokens[m.pattern().as_usize()]];
            let (mut start, mut end) = (m.start(), m.end());

            // Whitespace after the previous token may have been absorbed by
            // `rstrip`.
            if start < text_start {
                continue;
            }

            if token.single_word {
                let before = text[..start].chars().next_back();
                let after = text[end..].chars().next();
                if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
                    continue;
                }
            }

            if token.lstrip {
                start = text_start + text[text_start..start].trim_end().len();
            }
            if token.rstrip {
                let suffix = &text[end..];
                end += suffix.len() - suffix.trim_start().len();
            }

            if start > text_start {
                segments.push(Segment::Text(text_start..start));
            }
            segments.push(Segment::Token(token.id, start..end));
            text_start = end;
        }

        if text_start < text.len() {
            segments.push(Segment::Text(text_start..text.len()));
        }
        segments
    }
}
