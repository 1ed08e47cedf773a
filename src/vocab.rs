//! Bidirectional mapping between sub-word strings and token IDs.

use std::collections::HashMap;

/// Integer type used to represent token IDs.
pub type TokenId = u32;

/// Errors that can occur when constructing a [`Vocab`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum VocabError {
    /// A token which the model requires, such as the unknown token, has no
    /// entry in the vocabulary.
    #[error("token \"{0}\" is not in the vocabulary")]
    MissingToken(String),
}

/// Immutable vocabulary of a tokenization model.
///
/// This maps each sub-word string to a unique ID and back. It optionally
/// records the "unknown" token which models emit for input that cannot be
/// represented with any entry of the vocabulary.
#[derive(Clone, Debug, Default)]
pub struct Vocab {
    token_to_id: HashMap<String, TokenId>,
    id_to_token: HashMap<TokenId, String>,
    unknown: Option<TokenId>,
}

impl Vocab {
    /// Create a vocabulary from a map of token string to ID.
    ///
    /// If several strings share an ID, the reverse lookup returns one of them.
    pub fn new(token_to_id: HashMap<String, TokenId>) -> Vocab {
        let id_to_token = token_to_id
            .iter()
            .map(|(token, id)| (*id, token.clone()))
            .collect();
        Vocab {
            token_to_id,
            id_to_token,
            unknown: None,
        }
    }

    /// Designate `token` as the unknown token.
    pub fn with_unknown_token(mut self, token: &str) -> Result<Vocab, VocabError> {
        let id = self
            .token_to_id(token)
            .ok_or_else(|| VocabError::MissingToken(token.to_string()))?;
        self.unknown = Some(id);
        Ok(self)
    }

    /// Look up the ID of a token.
    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.token_to_id.get(token).copied()
    }

    /// Look up the string of a token ID.
    pub fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.id_to_token.get(&id).map(|s| s.as_str())
    }

    /// Return true if the vocabulary has an entry for `token`.
    pub fn contains(&self, token: &str) -> bool {
        self.token_to_id.contains_key(token)
    }

    /// ID of the unknown token, if the vocabulary has one.
    pub fn unknown_id(&self) -> Option<TokenId> {
        self.unknown
    }

    /// String of the unknown token, if the vocabulary has one.
    pub fn unknown_token(&self) -> Option<&str> {
        self.unknown.and_then(|id| self.id_to_token(id))
    }

    /// Number of distinct token IDs.
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use tokenflow_testing::vocab_from_tokens;

    use super::{Vocab, VocabError};

    #[test]
    fn test_lookup() {
        let vocab = Vocab::new(vocab_from_tokens(&["[UNK]", "brown", "##ish"]))
            .with_unknown_token("[UNK]")
            .unwrap();

        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.token_to_id("brown"), Some(1));
        assert_eq!(vocab.id_to_token(2), Some("##ish"));
        assert_eq!(vocab.id_to_token(3), None);
        assert_eq!(vocab.unknown_id(), Some(0));
        assert_eq!(vocab.unknown_token(), Some("[UNK]"));
    }

    #[test]
    fn test_missing_unknown_token() {
        let err = Vocab::new(vocab_from_tokens(&["brown"]))
            .with_unknown_token("[UNK]")
            .err();
        assert_eq!(err, Some(VocabError::MissingToken("[UNK]".to_string())));
    }
}
