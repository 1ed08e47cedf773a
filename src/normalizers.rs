//! Tools for performing string normalization prior to tokenization.
//!
//! Normalizers transform text (eg. lower-casing, stripping accents) while
//! keeping track of where every normalized character came from. Offsets
//! reported in an [`Encoding`](crate::Encoding) always refer to the original
//! input, so this alignment is carried through every normalization step.

use std::fmt::Debug;
use std::ops::Range;

use unicode_categories::UnicodeCategories;
use unicode_normalization_alignments::UnicodeNormalization;

/// Text produced by normalization, together with its alignment to the
/// original input.
///
/// Alignments are expressed as ranges of *character* positions in the
/// original text. Byte positions are derived from these when an encoding is
/// produced, so there is a single source of truth for offsets.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedText {
    text: String,

    /// For each byte of `text`, the range of chars in the original text that
    /// the char containing this byte was produced from.
    alignments: Vec<(usize, usize)>,
}

impl NormalizedText {
    /// Wrap un-normalized text whose first char is at char position
    /// `char_offset` in the original input.
    pub fn new(text: &str, char_offset: usize) -> NormalizedText {
        let mut out = NormalizedText::with_capacity(text.len());
        for (i, ch) in text.chars().enumerate() {
            let pos = char_offset + i;
            out.push(ch, (pos, pos + 1));
        }
        out
    }

    fn with_capacity(len: usize) -> NormalizedText {
        NormalizedText {
            text: String::with_capacity(len),
            alignments: Vec::with_capacity(len),
        }
    }

    /// Return the normalized text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Map a non-empty byte range in the normalized text to the range of chars
    /// in the original text it was produced from.
    pub fn original_range(&self, range: Range<usize>) -> Option<Range<usize>> {
        if range.is_empty() {
            return None;
        }
        let (start, _) = *self.alignments.get(range.start)?;
        let (_, end) = *self.alignments.get(range.end - 1)?;
        Some(start..end.max(start))
    }

    /// Return the part of the text in the byte range `range`, which must lie
    /// on char boundaries.
    pub fn slice(&self, range: Range<usize>) -> NormalizedText {
        NormalizedText {
            text: self.text[range.clone()].to_string(),
            alignments: self.alignments[range].to_vec(),
        }
    }

    /// Iterate over `(char, alignment)` pairs.
    fn chars(&self) -> impl Iterator<Item = (char, (usize, usize))> + '_ {
        self.text
            .char_indices()
            .map(|(pos, ch)| (ch, self.alignments[pos]))
    }

    fn push(&mut self, ch: char, align: (usize, usize)) {
        self.text.push(ch);
        for _ in 0..ch.len_utf8() {
            self.alignments.push(align);
        }
    }

    /// Rebuild the text from `(char, change)` pairs that describe how each
    /// output char relates to the chars of `self`, as produced by
    /// [`UnicodeNormalization`]:
    ///
    /// - A positive change means the char is inserted. It is aligned with the
    ///   preceding char.
    /// - Zero means the char replaces the next char.
    /// - `-n` means the char replaces the next char and the `n` chars after it.
    fn transform(&self, changes: impl IntoIterator<Item = (char, isize)>) -> NormalizedText {
        let aligns: Vec<(usize, usize)> = self.chars().map(|(_, align)| align).collect();
        let mut out = NormalizedText::with_capacity(self.text.len());
        let mut next: usize = 0;

        for (ch, change) in changes {
            let consumed = if change > 0 {
                0
            } else {
                1 + change.unsigned_abs()
            };
            let align = if consumed == 0 {
                aligns.get(next.saturating_sub(1)).copied()
            } else {
                let start = next.min(aligns.len());
                let end = (next + consumed).min(aligns.len());
                let replaced = &aligns[start..end];
                replaced.first().map(|&(first_start, first_end)| {
                    let end = replaced.iter().map(|&(_, end)| end).fold(first_end, usize::max);
                    (first_start, end)
                })
            };
            next += consumed;

            let align = align.or(aligns.last().copied()).unwrap_or((0, 0));
            out.push(ch, align);
        }

        out
    }

    /// Replace each char with the zero or more chars that `map` emits for it.
    ///
    /// Emitted chars inherit the alignment of the char they replace.
    pub fn map_chars(&self, mut map: impl FnMut(char, &mut dyn FnMut(char))) -> NormalizedText {
        let mut out = NormalizedText::with_capacity(self.text.len());
        for (ch, align) in self.chars() {
            map(ch, &mut |new_ch| out.push(new_ch, align));
        }
        out
    }

    /// Insert `prefix` at the start of the text. The inserted chars are
    /// aligned with the first char of the text.
    pub fn prepend(&mut self, prefix: &str) {
        let Some(&align) = self.alignments.first() else {
            return;
        };
        let mut out = NormalizedText::with_capacity(prefix.len() + self.text.len());
        for ch in prefix.chars() {
            out.push(ch, align);
        }
        out.text.push_str(&self.text);
        out.alignments.extend_from_slice(&self.alignments);
        *self = out;
    }
}

/// A normalizer applies normalization such as Unicode normalization and
/// lower-casing to strings.
///
/// Normalization is deterministic and infallible. Implementations must
/// preserve the alignment between normalized and original text, which
/// [`NormalizedText::map_chars`] does automatically.
pub trait Normalizer: Debug + Send + Sync {
    /// Apply normalization to a string.
    fn normalize(&self, text: NormalizedText) -> NormalizedText;
}

/// Return true if `ch` is a control char, as defined by BERT.
///
/// Tabs and newlines are technically control chars but are treated as
/// whitespace.
fn is_control(ch: char) -> bool {
    match ch {
        '\t' | '\n' | '\r' => false,
        _ => ch.is_other(),
    }
}

/// Return true if `ch` is whitespace, as defined by BERT.
fn is_whitespace(ch: char) -> bool {
    matches!(ch, '\t' | '\n' | '\r') || ch.is_whitespace()
}

/// Return true if `ch` is in one of the CJK Unified Ideographs blocks.
///
/// Despite the name this does not cover all of Chinese, Japanese or Korean
/// script. See `_is_chinese_char` in the original BERT tokenizer.
fn is_chinese_char(ch: char) -> bool {
    matches!(
        ch as u32,
        0x4E00..=0x9FFF
            | 0x3400..=0x4DBF
            | 0x20000..=0x2A6DF
            | 0x2A700..=0x2B73F
            | 0x2B740..=0x2B81F
            | 0x2B920..=0x2CEAF
            | 0xF900..=0xFAFF
            | 0x2F800..=0x2FA1F
    )
}

/// A [`Normalizer`] that implements normalization used by BERT and BERT-derived
/// models.
#[derive(Clone, Debug)]
pub struct Bert {
    clean_text: bool,
    handle_chinese_chars: bool,
    strip_accents: bool,
    lowercase: bool,
}

/// Configuration for a [`Bert`] normalizer.
#[derive(Clone, Debug, Default)]
pub struct BertOptions {
    /// Remove control chars and replace all whitespace with ASCII spaces.
    pub clean_text: bool,

    /// Surround CJK ideographs with spaces so that they become separate words.
    pub handle_chinese_chars: bool,

    /// Whether to strip accents when tokenizing. An "accent" is defined as
    /// any unicode character in the Nonspacing Mark ("Mn") category, after
    /// canonical decomposition.
    pub strip_accents: bool,

    /// If true, convert all text to lowercase using [`char::to_lowercase`].
    pub lowercase: bool,
}

impl Bert {
    pub fn new(opts: BertOptions) -> Bert {
        Bert {
            clean_text: opts.clean_text,
            handle_chinese_chars: opts.handle_chinese_chars,
            strip_accents: opts.strip_accents,
            lowercase: opts.lowercase,
        }
    }
}

impl Normalizer for Bert {
    fn normalize(&self, text: NormalizedText) -> NormalizedText {
        let mut text = text.map_chars(|ch, emit| {
            let ch = if self.clean_text {
                if ch == '\0' || ch == '\u{fffd}' || is_control(ch) {
                    return;
                }
                if is_whitespace(ch) {
                    ' '
                } else {
                    ch
                }
            } else {
                ch
            };

            if self.handle_chinese_chars && is_chinese_char(ch) {
                emit(' ');
                emit(ch);
                emit(' ');
            } else {
                emit(ch);
            }
        });

        if self.strip_accents {
            text = StripAccents.normalize(Unicode::Nfd.normalize(text));
        }
        if self.lowercase {
            text = Lowercase.normalize(text);
        }
        text
    }
}

/// Convert text to lower case.
#[derive(Clone, Debug, Default)]
pub struct Lowercase;

impl Normalizer for Lowercase {
    fn normalize(&self, text: NormalizedText) -> NormalizedText {
        text.map_chars(|ch, emit| ch.to_lowercase().for_each(emit))
    }
}

/// Remove all chars in the Nonspacing Mark ("Mn") category.
///
/// This is normally preceded by [`Unicode::Nfd`] so that accented chars are
/// decomposed into a base char and combining marks first.
#[derive(Clone, Debug, Default)]
pub struct StripAccents;

impl Normalizer for StripAccents {
    fn normalize(&self, text: NormalizedText) -> NormalizedText {
        text.map_chars(|ch, emit| {
            if !ch.is_mark_nonspacing() {
                emit(ch)
            }
        })
    }
}

/// Remove whitespace from the start and/or end of the text.
#[derive(Clone, Debug)]
pub struct Strip {
    pub left: bool,
    pub right: bool,
}

impl Normalizer for Strip {
    fn normalize(&self, text: NormalizedText) -> NormalizedText {
        let s = text.as_str();
        let start = if self.left {
            s.len() - s.trim_start().len()
        } else {
            0
        };
        let end = if self.right {
            s.trim_end().len().max(start)
        } else {
            s.len()
        };
        if start == 0 && end == s.len() {
            return text;
        }
        text.slice(start..end)
    }
}

/// Normalize text into one of the standard Unicode normalization forms.
#[derive(Clone, Debug)]
pub enum Unicode {
    /// Canonical decomposition, followed by canonical composition
    Nfc,
    /// Canonical decomposition
    Nfd,
    /// Compatibility decomposition, followed by canonical composition
    Nfkc,
    /// Compatibility decomposition
    Nfkd,
}

impl Normalizer for Unicode {
    fn normalize(&self, text: NormalizedText) -> NormalizedText {
        let s = text.as_str();
        match self {
            Self::Nfc => text.transform(s.nfc()),
            Self::Nfd => text.transform(s.nfd()),
            Self::Nfkc => text.transform(s.nfkc()),
            Self::Nfkd => text.transform(s.nfkd()),
        }
    }
}

/// Apply a sequence of normalizers in order.
#[derive(Debug)]
pub struct Sequence {
    normalizers: Vec<Box<dyn Normalizer>>,
}

impl Sequence {
    pub fn from_vec(normalizers: Vec<Box<dyn Normalizer>>) -> Self {
        Sequence { normalizers }
    }
}

impl Normalizer for Sequence {
    fn normalize(&self, text: NormalizedText) -> NormalizedText {
        self.normalizers
            .iter()
            .fold(text, |text, normalizer| normalizer.normalize(text))
    }
}

#[cfg(test)]
mod tests {
    use tokenflow_testing::TestCases;

    use super::{
        Bert, BertOptions, Lowercase, NormalizedText, Normalizer, Sequence, StripAccents,
        Strip, Unicode,
    };

    /// Return the normalized text and the start of the original char range
    /// for each byte.
    fn normalize(normalizer: &dyn Normalizer, input: &str) -> (String, Vec<usize>) {
        let normalized = normalizer.normalize(NormalizedText::new(input, 0));
        let starts = (0..normalized.len())
            .map(|i| normalized.original_range(i..i + 1).unwrap().start)
            .collect();
        (normalized.as_str().to_string(), starts)
    }

    #[test]
    fn test_bert_normalizer_noop() {
        let normalizer = Bert::new(BertOptions::default());
        let inputs = [
            "Hello world!", // Mixed case
            "Motörhead",    // Accented
            "lowercase",
        ];
        for input in inputs {
            let (normalized, _) = normalize(&normalizer, input);
            assert_eq!(normalized, input);
        }
    }

    #[test]
    fn test_bert_normalizer() {
        #[derive(Debug)]
        struct Case<'a> {
            input: &'a str,
            opts: BertOptions,
            expected: &'a str,
            expected_starts: Vec<usize>,
        }

        let cases = [
            // Chars which expand when lower-cased. "İ" becomes "i" followed
            // by a two-byte combining dot, all aligned to the same char.
            Case {
                input: "İİAB",
                opts: BertOptions {
                    lowercase: true,
                    ..Default::default()
                },
                expected: "i\u{307}i\u{307}ab",
                expected_starts: vec![0, 0, 0, 1, 1, 1, 2, 3],
            },
            // Accent stripping. Note the two-byte "ö" maps to one-byte "o".
            Case {
                input: "Motörhead",
                opts: BertOptions {
                    strip_accents: true,
                    ..Default::default()
                },
                expected: "Motorhead",
                expected_starts: vec![0, 1, 2, 3, 4, 5, 6, 7, 8],
            },
            Case {
                input: "Käse",
                opts: BertOptions {
                    strip_accents: true,
                    lowercase: true,
                    ..Default::default()
                },
                expected: "kase",
                expected_starts: vec![0, 1, 2, 3],
            },
            // Control chars are removed and whitespace is replaced.
            Case {
                input: "a\u{0}b\tc\u{200b}",
                opts: BertOptions {
                    clean_text: true,
                    ..Default::default()
                },
                expected: "ab c",
                expected_starts: vec![0, 2, 3, 4],
            },
            // CJK ideographs are surrounded by spaces.
            Case {
                input: "a中b",
                opts: BertOptions {
                    handle_chinese_chars: true,
                    ..Default::default()
                },
                expected: "a 中 b",
                expected_starts: vec![0, 1, 1, 1, 1, 1, 2],
            },
        ];

        cases.test_each_value(|case| {
            let normalizer = Bert::new(case.opts);
            let (normalized, starts) = normalize(&normalizer, case.input);
            assert_eq!(normalized, case.expected);
            assert_eq!(starts, case.expected_starts);
        })
    }

    #[test]
    fn test_unicode() {
        #[derive(Debug)]
        struct Case<'a> {
            input: &'a str,
            normalizer: Unicode,
            expected: &'a str,
            expected_starts: Vec<usize>,
        }

        let noop_case = |normalizer| Case {
            input: "abc",
            normalizer,
            expected: "abc",
            expected_starts: [0, 1, 2].into(),
        };

        let cases = [
            noop_case(Unicode::Nfc),
            noop_case(Unicode::Nfd),
            noop_case(Unicode::Nfkc),
            noop_case(Unicode::Nfkd),
            // Composition
            Case {
                input: "I\u{307}ab",
                normalizer: Unicode::Nfc,
                expected: "İab",
                expected_starts: [0, 0, 2, 3].into(),
            },
            // Canonical decomposition
            Case {
                input: "İa",
                normalizer: Unicode::Nfd,
                expected: "I\u{307}a",
                expected_starts: [0, 0, 0, 1].into(),
            },
            // Compatibility decomposition, followed by composition
            Case {
                input: "①",
                normalizer: Unicode::Nfkc,
                expected: "1",
                expected_starts: [0].into(),
            },
            Case {
                input: "Éab",
                normalizer: Unicode::Nfkd,
                expected: "E\u{301}ab",
                expected_starts: [0, 0, 0, 1, 2].into(),
            },
        ];

        cases.test_each_value(|case| {
            let (normalized, starts) = normalize(&case.normalizer, case.input);
            assert_eq!(normalized, case.expected);
            assert_eq!(starts, case.expected_starts);
        })
    }

    #[test]
    fn test_unicode_reorders_marks() {
        #[derive(Debug)]
        struct Case<'a> {
            input: &'a str,
            normalizer: Unicode,
            expected: &'a str,
        }

        let cases = [
            Case {
                input: "a\u{301}\u{323}",
                normalizer: Unicode::Nfd,
                expected: "a\u{323}\u{301}",
            },
            Case {
                input: "a\u{301}\u{323}",
                normalizer: Unicode::Nfc,
                expected: "\u{1ea1}\u{301}",
            },
            Case {
                input: "\u{1e0b}\u{323}",
                normalizer: Unicode::Nfc,
                expected: "\u{1e0d}\u{307}",
            },
            Case {
                input: "e\u{301}\u{327}",
                normalizer: Unicode::Nfkc,
                expected: "\u{229}\u{301}",
            },
            Case {
                input: "\u{1e0b}\u{323}",
                normalizer: Unicode::Nfkd,
                expected: "d\u{323}\u{307}",
            },
        ];

        cases.test_each_value(|case| {
            let normalized = case.normalizer.normalize(NormalizedText::new(case.input, 0));
            assert_eq!(normalized.as_str(), case.expected);

            // Alignments stay within the input.
            let n_chars = case.input.chars().count();
            let range = normalized.original_range(0..normalized.len()).unwrap();
            assert_eq!(range.start, 0);
            assert!(range.end > 0 && range.end <= n_chars);
        })
    }

    #[test]
    fn test_unicode_matches_reference_forms() {
        use unicode_normalization::UnicodeNormalization;

        let inputs = [
            "Ohne UTF-8, ist alles Käse!",
            "ﬁne ①②",
            "o\u{308}\u{304}\u{323}",
            "\u{1100}\u{1161}\u{11a8}",
            "Å\u{31b}\u{301}",
        ];

        for input in inputs {
            let normalize = |normalizer: Unicode| {
                normalizer
                    .normalize(NormalizedText::new(input, 0))
                    .as_str()
                    .to_string()
            };
            assert_eq!(normalize(Unicode::Nfc), input.nfc().collect::<String>());
            assert_eq!(normalize(Unicode::Nfd), input.nfd().collect::<String>());
            assert_eq!(normalize(Unicode::Nfkc), input.nfkc().collect::<String>());
            assert_eq!(normalize(Unicode::Nfkd), input.nfkd().collect::<String>());
        }
    }

    #[test]
    fn test_composed_range() {
        let normalized = Unicode::Nfc.normalize(NormalizedText::new("xI\u{307}", 10));
        assert_eq!(normalized.as_str(), "xİ");
        assert_eq!(normalized.original_range(1..3), Some(11..13));
        assert_eq!(normalized.original_range(0..3), Some(10..13));
        assert_eq!(normalized.original_range(1..1), None);
    }

    #[test]
    fn test_strip() {
        let strip = Strip {
            left: true,
            right: true,
        };
        let (normalized, starts) = normalize(&strip, "  ab ");
        assert_eq!(normalized, "ab");
        assert_eq!(starts, [2, 3]);

        let (normalized, _) = normalize(&strip, "   ");
        assert_eq!(normalized, "");
    }

    #[test]
    fn test_sequence() {
        let seq = Sequence::from_vec(vec![
            Box::new(Unicode::Nfd),
            Box::new(StripAccents),
            Box::new(Lowercase),
        ]);
        let (normalized, starts) = normalize(&seq, "Éa");
        assert_eq!(normalized, "ea");
        assert_eq!(starts, [0, 1]);
    }

    #[test]
    fn test_prepend() {
        let mut text = NormalizedText::new("hi", 0);
        text.prepend(" ");
        assert_eq!(text.as_str(), " hi");
        assert_eq!(text.original_range(0..2), Some(0..1));

        let mut empty = NormalizedText::new("", 0);
        empty.prepend(" ");
        assert!(empty.is_empty());
    }
}
