//! Post-processors which insert special tokens around encoded sequences.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::encoding::Encoded;
use crate::vocab::TokenId;

/// Errors that occur when constructing a post-processor.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum PostProcessError {
    /// A template string or piece could not be parsed.
    #[error("invalid template \"{0}\"")]
    InvalidTemplate(String),

    /// A template refers to a special token that has no definition.
    #[error("template refers to undefined special token \"{0}\"")]
    MissingSpecialToken(String),
}

/// A post-processor combines the encodings of one or two sequences,
/// inserting special tokens and assigning type IDs.
pub trait PostProcessor: Debug + Send + Sync {
    /// Return the number of special tokens that [`apply`](PostProcessor::apply)
    /// adds for a single sequence or a pair.
    fn added_tokens(&self, is_pair: bool) -> usize;

    /// Combine the encodings of the first and (optional) second sequence.
    ///
    /// Overflowing parts of the inputs are discarded.
    fn apply(&self, first: Encoded, second: Option<Encoded>) -> Encoded;

    /// Return the IDs of all special tokens this post-processor can insert.
    fn special_token_ids(&self) -> Vec<TokenId>;
}

/// Concatenate two encodings without special tokens. All tokens get type
/// ID 0.
fn concat(first: Encoded, second: Option<Encoded>) -> Encoded {
    let mut out = first;
    if let Some(second) = second {
        out.append(second, 0);
    }
    out
}

/// Combine the first and second encodings and their overflowing parts.
///
/// If `add_special_tokens` is false or there is no processor, encodings are
/// concatenated as-is. The overflowing parts of the result are, in order,
/// each overflowing part of `first` combined with `second` followed by each
/// overflowing part of `second`, then `first` combined with each
/// overflowing part of `second`.
pub(crate) fn post_process(
    processor: Option<&dyn PostProcessor>,
    mut first: Encoded,
    mut second: Option<Encoded>,
    add_special_tokens: bool,
) -> Encoded {
    let apply = |a: Encoded, b: Option<Encoded>| match processor {
        Some(processor) if add_special_tokens => processor.apply(a, b),
        _ => concat(a, b),
    };

    let first_overflowing = std::mem::take(&mut first.overflowing);
    let second_overflowing = second
        .as_mut()
        .map(|second| std::mem::take(&mut second.overflowing))
        .unwrap_or_default();

    let mut overflowing = Vec::new();
    for first_part in &first_overflowing {
        overflowing.push(apply(first_part.clone(), second.clone()));
        for second_part in &second_overflowing {
            overflowing.push(apply(first_part.clone(), Some(second_part.clone())));
        }
    }
    for second_part in second_overflowing {
        overflowing.push(apply(first.clone(), Some(second_part)));
    }

    let mut out = apply(first, second);
    out.overflowing = overflowing;
    out
}

/// Post-processor for BERT models.
///
/// Produces `[CLS] A [SEP]` for single sequences and `[CLS] A [SEP] B [SEP]`
/// for pairs. Tokens of B and the final separator get type ID 1.
#[derive(Clone, Debug)]
pub struct Bert {
    cls: (String, TokenId),
    sep: (String, TokenId),
}

impl Bert {
    pub fn new(cls: (String, TokenId), sep: (String, TokenId)) -> Bert {
        Bert { cls, sep }
    }
}

impl PostProcessor for Bert {
    fn added_tokens(&self, is_pair: bool) -> usize {
        if is_pair {
            3
        } else {
            2
        }
    }

    fn apply(&self, first: Encoded, second: Option<Encoded>) -> Encoded {
        let len = first.len() + second.as_ref().map_or(0, |s| s.len());
        let mut out =
            Encoded::with_fields(first.fields, len + self.added_tokens(second.is_some()));

        out.push_special(self.cls.1, &self.cls.0, 0);
        out.append(first, 0);
        out.push_special(self.sep.1, &self.sep.0, 0);
        if let Some(second) = second {
            out.append(second, 1);
            out.push_special(self.sep.1, &self.sep.0, 1);
        }
        out
    }

    fn special_token_ids(&self) -> Vec<TokenId> {
        vec![self.cls.1, self.sep.1]
    }
}

/// Post-processor for RoBERTa models.
///
/// Produces `<s> A </s>` for single sequences and `<s> A </s> </s> B </s>`
/// for pairs. All tokens get type ID 0.
#[derive(Clone, Debug)]
pub struct Roberta {
    cls: (String, TokenId),
    sep: (String, TokenId),
}

impl Roberta {
    pub fn new(cls: (String, TokenId), sep: (String, TokenId)) -> Roberta {
        Roberta { cls, sep }
    }
}

impl PostProcessor for Roberta {
    fn added_tokens(&self, is_pair: bool) -> usize {
        if is_pair {
            4
        } else {
            2
        }
    }

    fn apply(&self, first: Encoded, second: Option<Encoded>) -> Encoded {
        let len = first.len() + second.as_ref().map_or(0, |s| s.len());
        let mut out =
            Encoded::with_fields(first.fields, len + self.added_tokens(second.is_some()));

        out.push_special(self.cls.1, &self.cls.0, 0);
        out.append(first, 0);
        out.push_special(self.sep.1, &self.sep.0, 0);
        if let Some(second) = second {
            out.push_special(self.sep.1, &self.sep.0, 0);
            out.append(second, 0);
            out.push_special(self.sep.1, &self.sep.0, 0);
        }
        out
    }

    fn special_token_ids(&self) -> Vec<TokenId> {
        vec![self.cls.1, self.sep.1]
    }
}

/// Post-processor for byte-level BPE models. It does not add any tokens.
/// Tokens of the second sequence get type ID 1.
#[derive(Clone, Debug, Default)]
pub struct ByteLevel {}

impl ByteLevel {
    pub fn new() -> ByteLevel {
        ByteLevel {}
    }
}

impl PostProcessor for ByteLevel {
    fn added_tokens(&self, _is_pair: bool) -> usize {
        0
    }

    fn apply(&self, first: Encoded, second: Option<Encoded>) -> Encoded {
        let mut out = first;
        if let Some(second) = second {
            out.append(second, 1);
        }
        out
    }

    fn special_token_ids(&self) -> Vec<TokenId> {
        Vec::new()
    }
}

/// Identifies one of the input sequences in a [`Template`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Sequence {
    A,
    B,
}

/// One item of a [`Template`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Piece {
    /// Insert all tokens of an input sequence.
    Sequence { id: Sequence, type_id: u32 },

    /// Insert the tokens of a named special token.
    SpecialToken { id: String, type_id: u32 },
}

impl Piece {
    /// Parse a piece in the string form used by `tokenizer.json` templates.
    ///
    /// `$A` and `$B` (or `$` alone, for A) refer to sequences, `$<n>` refers
    /// to sequence A with type ID `n`, and anything else names a special
    /// token. A `:<n>` suffix sets the type ID.
    pub fn parse(s: &str) -> Result<Piece, PostProcessError> {
        let invalid = || PostProcessError::InvalidTemplate(s.to_string());

        let (name, type_id) = match s.split_once(':') {
            Some((name, type_id)) => {
                let type_id = type_id.parse::<u32>().map_err(|_| invalid())?;
                (name, Some(type_id))
            }
            None => (s, None),
        };
        if name.is_empty() {
            return Err(invalid());
        }

        let piece = match name.strip_prefix('$') {
            Some("" | "A" | "a") => Piece::Sequence {
                id: Sequence::A,
                type_id: type_id.unwrap_or(0),
            },
            Some("B" | "b") => Piece::Sequence {
                id: Sequence::B,
                type_id: type_id.unwrap_or(0),
            },
            Some(n) => {
                let seq_type_id = n.parse::<u32>().map_err(|_| invalid())?;
                Piece::Sequence {
                    id: Sequence::A,
                    type_id: type_id.unwrap_or(seq_type_id),
                }
            }
            None => Piece::SpecialToken {
                id: name.to_string(),
                type_id: type_id.unwrap_or(0),
            },
        };
        Ok(piece)
    }
}

/// A sequence of pieces describing how a post-processed encoding is laid
/// out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Template(Vec<Piece>);

impl Template {
    pub fn new(pieces: Vec<Piece>) -> Template {
        Template(pieces)
    }

    /// Parse a whitespace-separated template string such as
    /// `"[CLS]:0 $A:0 [SEP]:0"`.
    pub fn parse(template: &str) -> Result<Template, PostProcessError> {
        template
            .split_whitespace()
            .map(Piece::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Template)
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.0
    }

    fn contains(&self, seq: Sequence) -> bool {
        self.0
            .iter()
            .any(|piece| matches!(piece, Piece::Sequence { id, .. } if *id == seq))
    }
}

/// A special token inserted by [`TemplateProcessing`]. One named token can
/// expand to several IDs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecialToken {
    pub id: String,
    pub ids: Vec<TokenId>,
    pub tokens: Vec<String>,
}

impl SpecialToken {
    /// Create a special token which expands to a single token.
    pub fn single(token: &str, id: TokenId) -> SpecialToken {
        SpecialToken {
            id: token.to_string(),
            ids: vec![id],
            tokens: vec![token.to_string()],
        }
    }
}

/// Post-processor which lays out sequences and special tokens according to a
/// template for single sequences and one for pairs.
#[derive(Clone, Debug)]
pub struct TemplateProcessing {
    single: Template,
    pair: Template,
    special_tokens: HashMap<String, SpecialToken>,
}

impl TemplateProcessing {
    /// Create a template post-processor.
    ///
    /// Fails if a template refers to an undefined special token, if the
    /// single template refers to sequence B or if the pair template does not
    /// refer to both sequences.
    pub fn new(
        single: Template,
        pair: Template,
        special_tokens: Vec<SpecialToken>,
    ) -> Result<TemplateProcessing, PostProcessError> {
        let special_tokens: HashMap<String, SpecialToken> = special_tokens
            .into_iter()
            .map(|token| (token.id.clone(), token))
            .collect();

        for piece in single.pieces().iter().chain(pair.pieces()) {
            if let Piece::SpecialToken { id, .. } = piece {
                let token = special_tokens
                    .get(id)
                    .ok_or_else(|| PostProcessError::MissingSpecialToken(id.clone()))?;
                if token.ids.len() != token.tokens.len() {
                    return Err(PostProcessError::InvalidTemplate(format!(
                        "special token \"{}\" has {} ids and {} tokens",
                        id,
                        token.ids.len(),
                        token.tokens.len()
                    )));
                }
            }
        }

        let describe = |template: &Template| {
            let pieces: Vec<_> = template.pieces().iter().map(|p| format!("{:?}", p)).collect();
            pieces.join(" ")
        };
        if single.contains(Sequence::B) {
            return Err(PostProcessError::InvalidTemplate(describe(&single)));
        }
        if !pair.pieces().is_empty() && !(pair.contains(Sequence::A) && pair.contains(Sequence::B))
        {
            return Err(PostProcessError::InvalidTemplate(describe(&pair)));
        }

        Ok(TemplateProcessing {
            single,
            pair,
            special_tokens,
        })
    }

    fn template(&self, is_pair: bool) -> &Template {
        if is_pair {
            &self.pair
        } else {
            &self.single
        }
    }
}

impl PostProcessor for TemplateProcessing {
    fn added_tokens(&self, is_pair: bool) -> usize {
        self.template(is_pair)
            .pieces()
            .iter()
            .map(|piece| match piece {
                Piece::SpecialToken { id, .. } => {
                    self.special_tokens.get(id).map_or(0, |t| t.ids.len())
                }
                Piece::Sequence { .. } => 0,
            })
            .sum()
    }

    fn apply(&self, first: Encoded, second: Option<Encoded>) -> Encoded {
        let is_pair = second.is_some();
        let len = first.len() + second.as_ref().map_or(0, |s| s.len());
        let mut out = Encoded::with_fields(first.fields, len + self.added_tokens(is_pair));

        // Each sequence is inserted at most once.
        let mut first = Some(first);
        let mut second = second;

        for piece in self.template(is_pair).pieces() {
            match piece {
                Piece::Sequence { id, type_id } => {
                    let seq = match id {
                        Sequence::A => first.take(),
                        Sequence::B => second.take(),
                    };
                    if let Some(seq) = seq {
                        out.append(seq, *type_id);
                    }
                }
                Piece::SpecialToken { id, type_id } => {
                    if let Some(token) = self.special_tokens.get(id) {
                        for (&id, token) in token.ids.iter().zip(&token.tokens) {
                            out.push_special(id, token, *type_id);
                        }
                    }
                }
            }
        }
        out
    }

    fn special_token_ids(&self) -> Vec<TokenId> {
        self.special_tokens
            .values()
            .flat_map(|token| token.ids.iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use tokenflow_testing::TestCases;

    use super::{
        post_process, Bert, ByteLevel, Piece, PostProcessError, PostProcessor, Roberta,
        Sequence, SpecialToken, Template, TemplateProcessing,
    };
    use crate::encoding::{Encoded, Side};

    fn bert() -> Bert {
        Bert::new(("[CLS]".into(), 101), ("[SEP]".into(), 102))
    }

    fn bert_template() -> TemplateProcessing {
        TemplateProcessing::new(
            Template::parse("[CLS] $A [SEP]").unwrap(),
            Template::parse("[CLS]:0 $A:0 [SEP]:0 $B:1 [SEP]:1").unwrap(),
            vec![
                SpecialToken::single("[CLS]", 101),
                SpecialToken::single("[SEP]", 102),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_bert() {
        let processor = bert();
        let single = processor.apply(Encoded::from_ids(&[5, 6]), None);
        assert_eq!(single.ids, [101, 5, 6, 102]);
        assert_eq!(single.type_ids, [0, 0, 0, 0]);
        assert_eq!(single.special_tokens_mask, [1, 0, 0, 1]);
        assert_eq!(single.offsets, [(0, 0), (0, 1), (1, 2), (0, 0)]);

        let pair = processor.apply(Encoded::from_ids(&[5]), Some(Encoded::from_ids(&[7, 8])));
        assert_eq!(pair.ids, [101, 5, 102, 7, 8, 102]);
        assert_eq!(pair.type_ids, [0, 0, 0, 1, 1, 1]);
        assert_eq!(pair.tokens, ["[CLS]", "t5", "[SEP]", "t7", "t8", "[SEP]"]);
        assert_eq!(processor.added_tokens(false), 2);
        assert_eq!(processor.added_tokens(true), 3);
    }

    #[test]
    fn test_roberta() {
        let processor = Roberta::new(("<s>".into(), 0), ("</s>".into(), 2));
        let pair = processor.apply(Encoded::from_ids(&[5]), Some(Encoded::from_ids(&[7])));
        assert_eq!(pair.ids, [0, 5, 2, 2, 7, 2]);
        assert_eq!(pair.type_ids, [0; 6]);
        assert_eq!(processor.added_tokens(true), 4);
    }

    #[test]
    fn test_byte_level() {
        let processor = ByteLevel::new();
        let pair = processor.apply(Encoded::from_ids(&[5]), Some(Encoded::from_ids(&[7])));
        assert_eq!(pair.ids, [5, 7]);
        assert_eq!(pair.type_ids, [0, 1]);
        assert_eq!(processor.added_tokens(true), 0);
    }

    #[test]
    fn test_template_matches_bert() {
        let template = bert_template();
        let bert = bert();

        let single = || Encoded::from_ids(&[5, 6]);
        assert_eq!(template.apply(single(), None), bert.apply(single(), None));

        let pair = || (Encoded::from_ids(&[5]), Some(Encoded::from_ids(&[7, 8])));
        let (a, b) = pair();
        let (c, d) = pair();
        assert_eq!(template.apply(a, b), bert.apply(c, d));
        assert_eq!(template.added_tokens(false), 2);
        assert_eq!(template.added_tokens(true), 3);

        let mut ids = template.special_token_ids();
        ids.sort();
        assert_eq!(ids, [101, 102]);
    }

    #[test]
    fn test_template_multi_id_special_token() {
        let processor = TemplateProcessing::new(
            Template::parse("[BOS] $A").unwrap(),
            Template::parse("[BOS] $A $B:1").unwrap(),
            vec![SpecialToken {
                id: "[BOS]".into(),
                ids: vec![1, 2],
                tokens: vec!["<bos>".into(), "<lang>".into()],
            }],
        )
        .unwrap();
        let out = processor.apply(Encoded::from_ids(&[9]), None);
        assert_eq!(out.ids, [1, 2, 9]);
        assert_eq!(out.tokens, ["<bos>", "<lang>", "t9"]);
        assert_eq!(processor.added_tokens(false), 2);
    }

    #[test]
    fn test_parse_piece() {
        #[derive(Debug)]
        struct Case<'a> {
            piece: &'a str,
            expected: Result<Piece, PostProcessError>,
        }

        let seq = |id, type_id| Ok(Piece::Sequence { id, type_id });
        let cases = [
            Case {
                piece: "$A",
                expected: seq(Sequence::A, 0),
            },
            Case {
                piece: "$",
                expected: seq(Sequence::A, 0),
            },
            Case {
                piece: "$B:1",
                expected: seq(Sequence::B, 1),
            },
            Case {
                piece: "$1",
                expected: seq(Sequence::A, 1),
            },
            Case {
                piece: "[SEP]:1",
                expected: Ok(Piece::SpecialToken {
                    id: "[SEP]".into(),
                    type_id: 1,
                }),
            },
            Case {
                piece: "$A:x",
                expected: Err(PostProcessError::InvalidTemplate("$A:x".into())),
            },
            Case {
                piece: "$C",
                expected: Err(PostProcessError::InvalidTemplate("$C".into())),
            },
            Case {
                piece: ":1",
                expected: Err(PostProcessError::InvalidTemplate(":1".into())),
            },
        ];

        cases.test_each(|case| {
            assert_eq!(Piece::parse(case.piece), case.expected);
        })
    }

    #[test]
    fn test_template_errors() {
        let err = TemplateProcessing::new(
            Template::parse("[CLS] $A").unwrap(),
            Template::parse("[CLS] $A $B").unwrap(),
            vec![],
        )
        .err();
        assert_eq!(
            err,
            Some(PostProcessError::MissingSpecialToken("[CLS]".into()))
        );

        let err = TemplateProcessing::new(
            Template::parse("$A $B").unwrap(),
            Template::default(),
            vec![],
        );
        assert!(matches!(err, Err(PostProcessError::InvalidTemplate(_))));
    }

    #[test]
    fn test_post_process_without_special_tokens() {
        let processor = bert();
        let out = post_process(
            Some(&processor),
            Encoded::from_ids(&[5]),
            Some(Encoded::from_ids(&[7])),
            false,
        );
        assert_eq!(out.ids, [5, 7]);
        assert_eq!(out.type_ids, [0, 0]);

        let out = post_process(None, Encoded::from_ids(&[5]), None, true);
        assert_eq!(out.ids, [5]);
    }

    #[test]
    fn test_post_process_overflowing() {
        let processor = bert();
        let first = Encoded::from_ids(&[1, 2, 3]).truncate(2, 0, Side::Right);
        let second = Encoded::from_ids(&[7, 8]).truncate(1, 0, Side::Right);
        let out = post_process(Some(&processor), first, Some(second), true);

        assert_eq!(out.ids, [101, 1, 2, 102, 7, 102]);
        let overflowing: Vec<Vec<u32>> = out.overflowing.iter().map(|o| o.ids.clone()).collect();
        assert_eq!(
            overflowing,
            [
                vec![101, 3, 102, 7, 102],
                vec![101, 3, 102, 8, 102],
                vec![101, 1, 2, 102, 8, 102],
            ]
        );
    }
}
