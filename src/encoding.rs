//! Results of encoding text, and the per-token records they are built from.

use std::iter::repeat;
use std::ops::Range;

use crate::tokenizer::EncodeParams;
use crate::vocab::TokenId;

/// A `(start, end)` span of the original input that a token was produced
/// from. The unit is given by [`OffsetsUnit`].
pub type Offsets = (usize, usize);

/// Unit of the offsets in an [`Encoding`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OffsetsUnit {
    /// Offsets are byte positions in the UTF-8 input.
    #[default]
    Byte,

    /// Offsets are positions of Unicode code points ("chars") in the input.
    Char,
}

/// Direction in which sequences are truncated or padded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Left,
    Right,
}

/// Maps char positions in a text to the unit requested by the caller.
///
/// Offsets are tracked as char positions throughout encoding. Byte offsets
/// are derived from them using the byte position of each char.
pub(crate) struct OffsetMapper {
    /// Byte position of each char, followed by the length of the text.
    char_starts: Vec<usize>,
}

impl OffsetMapper {
    pub fn new(text: &str) -> OffsetMapper {
        let char_starts = text
            .char_indices()
            .map(|(pos, _)| pos)
            .chain(std::iter::once(text.len()))
            .collect();
        OffsetMapper { char_starts }
    }

    /// Return the char position which starts at or contains byte `pos`.
    pub fn byte_to_char(&self, pos: usize) -> usize {
        self.char_starts.partition_point(|&start| start < pos)
    }

    /// Convert a range of char positions to offsets in `unit`.
    pub fn offsets(&self, chars: Range<usize>, unit: OffsetsUnit) -> Offsets {
        match unit {
            OffsetsUnit::Char => (chars.start, chars.end),
            OffsetsUnit::Byte => {
                let byte = |pos: usize| {
                    self.char_starts
                        .get(pos)
                        .or(self.char_starts.last())
                        .copied()
                        .unwrap_or(0)
                };
                (byte(chars.start), byte(chars.end))
            }
        }
    }
}

/// Optional fields collected by an [`Encoded`] record. Token IDs are always
/// collected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Fields {
    pub tokens: bool,
    pub type_ids: bool,
    pub offsets: bool,
    pub special_tokens_mask: bool,
    pub attention_mask: bool,
}

impl Fields {
    pub fn all() -> Fields {
        Fields {
            tokens: true,
            type_ids: true,
            offsets: true,
            special_tokens_mask: true,
            attention_mask: true,
        }
    }
}

impl Default for Fields {
    fn default() -> Self {
        Self::all()
    }
}

impl From<&EncodeParams> for Fields {
    fn from(params: &EncodeParams) -> Fields {
        Fields {
            tokens: params.return_tokens,
            type_ids: params.return_type_ids,
            offsets: params.return_offsets,
            special_tokens_mask: params.return_special_tokens_mask,
            attention_mask: params.return_attention_mask,
        }
    }
}

/// Return the items of `field` in `range`, or nothing if the field is not
/// collected.
fn slice_field<T: Clone>(field: &[T], range: Range<usize>) -> Vec<T> {
    field.get(range).map(<[T]>::to_vec).unwrap_or_default()
}

/// Add `n` copies of `value` to `side` of `vec`.
fn pad_field<T: Clone>(vec: &mut Vec<T>, value: T, n: usize, side: Side) {
    match side {
        Side::Right => vec.extend(repeat(value).take(n)),
        Side::Left => {
            let mut padded = Vec::with_capacity(n + vec.len());
            padded.extend(repeat(value).take(n));
            padded.append(vec);
            *vec = padded;
        }
    }
}

/// Record of an encoded sequence, before it is converted to an
/// [`Encoding`].
///
/// Optional fields which are not listed in `fields` stay empty, so that
/// values the caller did not ask for are never allocated.
///
/// This is the value passed through [`PostProcessor`](crate::post_processors::PostProcessor)s.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Encoded {
    pub(crate) fields: Fields,
    pub(crate) ids: Vec<TokenId>,
    pub(crate) type_ids: Vec<u32>,
    pub(crate) tokens: Vec<String>,
    pub(crate) offsets: Vec<Offsets>,
    pub(crate) special_tokens_mask: Vec<u32>,
    pub(crate) attention_mask: Vec<u32>,

    /// Parts removed by truncation.
    pub(crate) overflowing: Vec<Encoded>,
}

impl Encoded {
    /// Create an empty record which collects every field.
    pub fn with_capacity(capacity: usize) -> Encoded {
        Self::with_fields(Fields::all(), capacity)
    }

    /// Create an empty record which collects `fields`.
    pub(crate) fn with_fields(fields: Fields, capacity: usize) -> Encoded {
        let capacity_if = |enabled: bool| if enabled { capacity } else { 0 };
        Encoded {
            fields,
            ids: Vec::with_capacity(capacity),
            type_ids: Vec::with_capacity(capacity_if(fields.type_ids)),
            tokens: Vec::with_capacity(capacity_if(fields.tokens)),
            offsets: Vec::with_capacity(capacity_if(fields.offsets)),
            special_tokens_mask: Vec::with_capacity(capacity_if(fields.special_tokens_mask)),
            attention_mask: Vec::with_capacity(capacity_if(fields.attention_mask)),
            overflowing: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn push(&mut self, id: TokenId, token: &str, offsets: Offsets, type_id: u32, special: bool) {
        let fields = self.fields;
        self.ids.push(id);
        if fields.type_ids {
            self.type_ids.push(type_id);
        }
        if fields.tokens {
            self.tokens.push(token.to_string());
        }
        if fields.offsets {
            self.offsets.push(offsets);
        }
        if fields.special_tokens_mask {
            self.special_tokens_mask.push(special.into());
        }
        if fields.attention_mask {
            self.attention_mask.push(1);
        }
    }

    /// Append a token produced from the input text.
    pub fn push_token(&mut self, id: TokenId, token: &str, offsets: Offsets) {
        self.push(id, token, offsets, 0, false);
    }

    /// Append a special token inserted by a post-processor.
    pub fn push_special(&mut self, id: TokenId, token: &str, type_id: u32) {
        self.push(id, token, (0, 0), type_id, true);
    }

    /// Append all tokens of `other`, assigning them the type ID `type_id`.
    ///
    /// Overflowing parts of `other` are discarded.
    pub fn append(&mut self, other: Encoded, type_id: u32) {
        let len = other.len();
        self.ids.extend(other.ids);
        if self.fields.type_ids {
            self.type_ids.extend(repeat(type_id).take(len));
        }
        self.tokens.extend(other.tokens);
        self.offsets.extend(other.offsets);
        self.special_tokens_mask.extend(other.special_tokens_mask);
        self.attention_mask.extend(other.attention_mask);
    }

    /// Return a copy of the tokens in `range`, without overflowing parts.
    fn slice(&self, range: Range<usize>) -> Encoded {
        Encoded {
            fields: self.fields,
            ids: self.ids[range.clone()].to_vec(),
            type_ids: slice_field(&self.type_ids, range.clone()),
            tokens: slice_field(&self.tokens, range.clone()),
            offsets: slice_field(&self.offsets, range.clone()),
            special_tokens_mask: slice_field(&self.special_tokens_mask, range.clone()),
            attention_mask: slice_field(&self.attention_mask, range),
            overflowing: Vec::new(),
        }
    }

    /// Truncate to at most `max_len` tokens, removing tokens from `side`.
    ///
    /// The removed tokens are split into windows of up to `max_len` tokens,
    /// each sharing `stride` tokens with its neighbor, and stored in
    /// `overflowing`. The caller must ensure `stride < max_len` unless
    /// `max_len` is zero.
    pub(crate) fn truncate(self, max_len: usize, stride: usize, side: Side) -> Encoded {
        let len = self.len();
        if max_len >= len {
            return self;
        }
        if max_len == 0 {
            let mut encoded = Encoded::with_fields(self.fields, 0);
            encoded.overflowing.push(self);
            return encoded;
        }

        let step = max_len.saturating_sub(stride).max(1);
        let mut windows = Vec::new();
        match side {
            Side::Right => {
                for start in (0..len).step_by(step) {
                    let stop = (start + max_len).min(len);
                    windows.push(start..stop);
                    if stop == len {
                        break;
                    }
                }
            }
            Side::Left => {
                for stop in (0..=len).rev().step_by(step) {
                    let start = stop.saturating_sub(max_len);
                    windows.push(start..stop);
                    if start == 0 {
                        break;
                    }
                }
            }
        }

        let mut parts = windows.into_iter().map(|range| self.slice(range));
        let mut main = parts
            .next()
            .unwrap_or_else(|| Encoded::with_fields(self.fields, 0));
        main.overflowing = parts.collect();
        main
    }

    /// Pad to at least `len` tokens, adding tokens on `side`. Overflowing
    /// parts are padded too.
    pub(crate) fn pad(
        &mut self,
        len: usize,
        pad_id: TokenId,
        pad_type_id: u32,
        pad_token: &str,
        side: Side,
    ) {
        for overflowing in &mut self.overflowing {
            overflowing.pad(len, pad_id, pad_type_id, pad_token, side);
        }

        if self.len() >= len {
            return;
        }
        let n_pad = len - self.len();
        let fields = self.fields;

        pad_field(&mut self.ids, pad_id, n_pad, side);
        if fields.type_ids {
            pad_field(&mut self.type_ids, pad_type_id, n_pad, side);
        }
        if fields.tokens {
            pad_field(&mut self.tokens, pad_token.to_string(), n_pad, side);
        }
        if fields.offsets {
            pad_field(&mut self.offsets, (0, 0), n_pad, side);
        }
        if fields.special_tokens_mask {
            pad_field(&mut self.special_tokens_mask, 1, n_pad, side);
        }
        if fields.attention_mask {
            pad_field(&mut self.attention_mask, 0, n_pad, side);
        }
    }

    /// Convert to an [`Encoding`] containing only the fields requested in
    /// `params`.
    pub(crate) fn into_encoding(self, params: &EncodeParams) -> Encoding {
        let Encoded {
            fields: _,
            ids,
            type_ids,
            tokens,
            offsets,
            special_tokens_mask,
            attention_mask,
            overflowing,
        } = self;
        Encoding {
            token_ids: ids,
            tokens: params.return_tokens.then_some(tokens),
            type_ids: params.return_type_ids.then_some(type_ids),
            special_tokens_mask: params
                .return_special_tokens_mask
                .then_some(special_tokens_mask),
            attention_mask: params.return_attention_mask.then_some(attention_mask),
            offsets: params.return_offsets.then_some(offsets),
            overflowing: overflowing
                .into_iter()
                .map(|part| part.into_encoding(params))
                .collect(),
        }
    }
}

/// Output produced by encoding a single text or pair of texts.
///
/// Token IDs are always present. The other fields are only present if they
/// were requested via [`EncodeParams`], in which case they have the same
/// length as the token IDs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Encoding {
    token_ids: Vec<TokenId>,
    tokens: Option<Vec<String>>,
    type_ids: Option<Vec<u32>>,
    special_tokens_mask: Option<Vec<u32>>,
    attention_mask: Option<Vec<u32>>,
    offsets: Option<Vec<Offsets>>,
    overflowing: Vec<Encoding>,
}

impl Encoding {
    /// Return the sequence of token IDs that the input was tokenized into.
    pub fn token_ids(&self) -> &[TokenId] {
        &self.token_ids
    }

    /// Consume `self` and return the token IDs as an owned vector.
    pub fn into_token_ids(self) -> Vec<TokenId> {
        self.token_ids
    }

    /// Return the string of each token.
    pub fn tokens(&self) -> Option<&[String]> {
        self.tokens.as_deref()
    }

    /// Return the index of the input sequence each token belongs to.
    pub fn type_ids(&self) -> Option<&[u32]> {
        self.type_ids.as_deref()
    }

    /// Return 1 for each special or padding token and 0 for tokens produced
    /// from the input.
    pub fn special_tokens_mask(&self) -> Option<&[u32]> {
        self.special_tokens_mask.as_deref()
    }

    /// Return 0 for each padding token and 1 otherwise.
    pub fn attention_mask(&self) -> Option<&[u32]> {
        self.attention_mask.as_deref()
    }

    /// Return the span of the input each token was produced from. For a pair
    /// of inputs, offsets are relative to the input the token came from.
    /// Special and padding tokens have offsets `(0, 0)`.
    pub fn offsets(&self) -> Option<&[Offsets]> {
        self.offsets.as_deref()
    }

    /// Return the encodings of tokens removed by truncation.
    pub fn overflowing(&self) -> &[Encoding] {
        &self.overflowing
    }

    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

#[cfg(test)]
impl Encoded {
    /// Create a record with one token per ID. Token `i` has the string
    /// `t{id}` and offsets `(i, i + 1)`.
    pub(crate) fn from_ids(ids: &[TokenId]) -> Encoded {
        let mut encoded = Encoded::with_capacity(ids.len());
        for (i, &id) in ids.iter().enumerate() {
            encoded.push_token(id, &format!("t{}", id), (i, i + 1));
        }
        encoded
    }
}

#[cfg(test)]
mod tests {
    use tokenflow_testing::TestCases;

    use super::{Encoded, Fields, OffsetMapper, OffsetsUnit, Side};
    use crate::tokenizer::EncodeParams;

    fn encoded(ids: &[u32]) -> Encoded {
        Encoded::from_ids(ids)
    }

    #[test]
    fn test_offset_mapper() {
        let mapper = OffsetMapper::new("aÄb");
        assert_eq!(mapper.offsets(0..2, OffsetsUnit::Char), (0, 2));
        assert_eq!(mapper.offsets(0..2, OffsetsUnit::Byte), (0, 3));
        assert_eq!(mapper.offsets(2..3, OffsetsUnit::Byte), (3, 4));
        assert_eq!(mapper.byte_to_char(0), 0);
        assert_eq!(mapper.byte_to_char(1), 1);
        assert_eq!(mapper.byte_to_char(3), 2);
        assert_eq!(mapper.byte_to_char(4), 3);
    }

    #[test]
    fn test_truncate() {
        #[derive(Debug)]
        struct Case {
            max_len: usize,
            stride: usize,
            side: Side,
            expected: Vec<u32>,
            expected_overflowing: Vec<Vec<u32>>,
        }

        let cases = [
            Case {
                max_len: 10,
                stride: 0,
                side: Side::Right,
                expected: vec![1, 2, 3, 4, 5],
                expected_overflowing: vec![],
            },
            Case {
                max_len: 2,
                stride: 0,
                side: Side::Right,
                expected: vec![1, 2],
                expected_overflowing: vec![vec![3, 4], vec![5]],
            },
            Case {
                max_len: 3,
                stride: 1,
                side: Side::Right,
                expected: vec![1, 2, 3],
                expected_overflowing: vec![vec![3, 4, 5]],
            },
            Case {
                max_len: 2,
                stride: 0,
                side: Side::Left,
                expected: vec![4, 5],
                expected_overflowing: vec![vec![2, 3], vec![1]],
            },
            Case {
                max_len: 3,
                stride: 1,
                side: Side::Left,
                expected: vec![3, 4, 5],
                expected_overflowing: vec![vec![1, 2, 3]],
            },
            Case {
                max_len: 0,
                stride: 0,
                side: Side::Right,
                expected: vec![],
                expected_overflowing: vec![vec![1, 2, 3, 4, 5]],
            },
        ];

        cases.test_each(|case| {
            let truncated = encoded(&[1, 2, 3, 4, 5]).truncate(case.max_len, case.stride, case.side);
            assert_eq!(truncated.ids, case.expected);
            let overflowing: Vec<Vec<u32>> =
                truncated.overflowing.iter().map(|o| o.ids.clone()).collect();
            assert_eq!(overflowing, case.expected_overflowing);
        })
    }

    #[test]
    fn test_truncate_keeps_fields_aligned() {
        let truncated = encoded(&[1, 2, 3]).truncate(2, 0, Side::Left);
        assert_eq!(truncated.tokens, ["t2", "t3"]);
        assert_eq!(truncated.offsets, [(1, 2), (2, 3)]);
        assert_eq!(truncated.overflowing[0].offsets, [(0, 1)]);
    }

    #[test]
    fn test_pad() {
        let mut right = encoded(&[7, 8]);
        right.pad(4, 0, 1, "[PAD]", Side::Right);
        assert_eq!(right.ids, [7, 8, 0, 0]);
        assert_eq!(right.type_ids, [0, 0, 1, 1]);
        assert_eq!(right.tokens, ["t7", "t8", "[PAD]", "[PAD]"]);
        assert_eq!(right.attention_mask, [1, 1, 0, 0]);
        assert_eq!(right.special_tokens_mask, [0, 0, 1, 1]);
        assert_eq!(right.offsets, [(0, 1), (1, 2), (0, 0), (0, 0)]);

        let mut left = encoded(&[7, 8]);
        left.pad(3, 0, 0, "[PAD]", Side::Left);
        assert_eq!(left.ids, [0, 7, 8]);
        assert_eq!(left.attention_mask, [0, 1, 1]);

        // Padding never shrinks.
        let mut long = encoded(&[1, 2, 3]);
        long.pad(2, 0, 0, "[PAD]", Side::Right);
        assert_eq!(long.ids, [1, 2, 3]);
    }

    #[test]
    fn test_into_encoding() {
        let mut truncated = encoded(&[1, 2, 3]).truncate(2, 0, Side::Right);
        truncated.push_special(101, "[CLS]", 0);

        let params = EncodeParams {
            return_tokens: true,
            return_offsets: false,
            ..Default::default()
        };
        let encoding = truncated.into_encoding(&params);
        assert_eq!(encoding.token_ids(), [1, 2, 101]);
        assert_eq!(encoding.tokens().unwrap(), ["t1", "t2", "[CLS]"]);
        assert!(encoding.offsets().is_none());
        assert_eq!(encoding.overflowing().len(), 1);
        assert_eq!(encoding.overflowing()[0].token_ids(), [3]);
        assert_eq!(encoding.overflowing()[0].tokens().unwrap(), ["t3"]);
    }

    #[test]
    fn test_uncollected_fields_stay_empty() {
        let params = EncodeParams {
            return_attention_mask: true,
            ..Default::default()
        };
        let mut encoded = Encoded::with_fields(Fields::from(&params), 4);
        encoded.push_token(5, "five", (0, 4));
        encoded.push_token(6, "six", (5, 8));
        encoded.push_token(7, "seven", (9, 14));

        let mut truncated = encoded.truncate(2, 0, Side::Right);
        truncated.push_special(101, "[CLS]", 0);
        truncated.pad(4, 0, 0, "[PAD]", Side::Left);

        assert_eq!(truncated.ids, [0, 5, 6, 101]);
        assert_eq!(truncated.attention_mask, [0, 1, 1, 1]);
        assert!(truncated.tokens.is_empty());
        assert!(truncated.type_ids.is_empty());
        assert!(truncated.offsets.is_empty());
        assert!(truncated.special_tokens_mask.is_empty());
        assert!(truncated.overflowing[0].tokens.is_empty());
        assert_eq!(truncated.overflowing[0].ids, [0, 0, 0, 7]);

        let encoding = truncated.into_encoding(&params);
        assert_eq!(encoding.attention_mask().unwrap(), [0, 1, 1, 1]);
        assert!(encoding.tokens().is_none());
    }
}
