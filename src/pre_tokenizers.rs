//! Pre-tokenizers which split text after normalization and before encoding
//! into token IDs by models.

use std::fmt::Debug;
use std::ops::Range;

use fancy_regex::Regex;
use unicode_categories::UnicodeCategories;

use crate::split::{char_matches, split_ranges, SliceExt, SplitDelimiterBehavior};

/// Errors occuring while constructing a [`PreTokenizer`] or splitting input
/// using one.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PreTokenizeError {
    /// An error occurred while constructing a regex from a pattern or
    /// splitting a string using a regex.
    #[error("regex failed: {0}")]
    RegexError(#[source] Box<fancy_regex::Error>),
}

impl From<fancy_regex::Error> for PreTokenizeError {
    fn from(val: fancy_regex::Error) -> Self {
        PreTokenizeError::RegexError(Box::new(val))
    }
}

/// A pre-tokenizer splits input text into chunks ("words") which are then
/// tokenized by a [`Model`](crate::models::Model) individually.
pub trait PreTokenizer: Debug + Send + Sync {
    /// Split `text` into chunks and return a vector of sub-slices.
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError>;

    /// Split `text` into chunks and return the byte range of each chunk.
    fn pre_tokenize_ranges(&self, text: &str) -> Result<Vec<Range<usize>>, PreTokenizeError> {
        let chunks = self.pre_tokenize(text)?;
        Ok(chunks
            .into_iter()
            .filter_map(|chunk| text.as_bytes().subslice_offsets(chunk.as_bytes()))
            .collect())
    }

    /// Return true if a space should be inserted at the start of the text
    /// before pre-tokenization, when the text does not already start with
    /// whitespace.
    fn prefix_space(&self) -> bool {
        false
    }
}

/// Return true if `ch` is punctuation, as defined by BERT.
pub(crate) fn is_punctuation(ch: char) -> bool {
    ch.is_ascii_punctuation() || ch.is_punctuation()
}

fn regex_matches(regex: &Regex, text: &str) -> Result<Vec<Range<usize>>, PreTokenizeError> {
    let mut matches = Vec::new();
    for match_ in regex.find_iter(text) {
        matches.push(match_?.range());
    }
    Ok(matches)
}

fn pieces<'a>(text: &'a str, ranges: Vec<Range<usize>>) -> Vec<&'a str> {
    ranges.into_iter().map(|r| &text[r]).collect()
}

/// Pre-tokenizer that implements the pre-tokenization rules used by BERT.
///
/// This splits the input on whitespace, which is removed, and then splits
/// each punctuation char into its own chunk.
#[derive(Clone, Debug, Default)]
pub struct Bert {}

impl Bert {
    pub fn new() -> Self {
        Bert {}
    }
}

impl PreTokenizer for Bert {
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError> {
        let words = split_ranges(
            text.len(),
            char_matches(text, char::is_whitespace),
            SplitDelimiterBehavior::Removed,
            false,
        );
        let mut chunks = Vec::with_capacity(words.len());
        for word in words {
            let word = &text[word];
            let ranges = split_ranges(
                word.len(),
                char_matches(word, is_punctuation),
                SplitDelimiterBehavior::Isolated,
                false,
            );
            chunks.extend(pieces(word, ranges));
        }
        Ok(chunks)
    }
}

/// Split into runs of word chars and runs of other non-whitespace chars,
/// using the regex `\w+|[^\w\s]+`.
#[derive(Debug)]
pub struct Whitespace {
    regex: Regex,
}

impl Whitespace {
    pub fn new() -> Whitespace {
        Whitespace {
            regex: Regex::new(r"\w+|[^\w\s]+").expect("pattern should be valid"),
        }
    }
}

impl Default for Whitespace {
    fn default() -> Self {
        Self::new()
    }
}

impl PreTokenizer for Whitespace {
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError> {
        let matches = regex_matches(&self.regex, text)?;
        Ok(pieces(
            text,
            split_ranges(text.len(), matches, SplitDelimiterBehavior::Removed, true),
        ))
    }
}

/// Split on whitespace only.
#[derive(Clone, Debug, Default)]
pub struct WhitespaceSplit;

impl PreTokenizer for WhitespaceSplit {
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError> {
        Ok(text.split_whitespace().collect())
    }
}

/// Split on punctuation chars.
#[derive(Clone, Debug, Default)]
pub struct Punctuation {
    behavior: SplitDelimiterBehavior,
}

impl Punctuation {
    pub fn new(behavior: SplitDelimiterBehavior) -> Punctuation {
        Punctuation { behavior }
    }
}

impl PreTokenizer for Punctuation {
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError> {
        let matches = char_matches(text, is_punctuation);
        Ok(pieces(
            text,
            split_ranges(text.len(), matches, self.behavior, false),
        ))
    }
}

/// Split into chunks containing either digits or non-digits.
#[derive(Clone, Debug, Default)]
pub struct Digits {
    individual_digits: bool,
}

impl Digits {
    /// Construct a digit splitter.
    ///
    /// `individual_digits` specifies whether each digit in a sequence of digits
    /// should be its own chunk or not.
    pub fn new(individual_digits: bool) -> Digits {
        Digits { individual_digits }
    }
}

impl PreTokenizer for Digits {
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError> {
        let behavior = if self.individual_digits {
            SplitDelimiterBehavior::Isolated
        } else {
            SplitDelimiterBehavior::Contiguous
        };
        let matches = char_matches(text, char::is_numeric);
        Ok(pieces(text, split_ranges(text.len(), matches, behavior, false)))
    }
}

/// Tokenization regex used by GPT-2.
///
/// See <https://github.com/openai/tiktoken/blob/main/tiktoken_ext/openai_public.py>.
pub const GPT2_REGEX: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Pattern used by a [`Split`] pre-tokenizer.
#[derive(Clone, Debug)]
pub enum SplitPattern {
    /// Match a literal string.
    String(String),
    /// Match a regular expression.
    Regex(String),
}

#[derive(Debug)]
enum Matcher {
    Literal(String),
    Regex(Box<Regex>),
}

/// Configuration for a [`Split`] pre-tokenizer.
#[derive(Clone, Debug)]
pub struct SplitOptions {
    pub pattern: SplitPattern,
    pub behavior: SplitDelimiterBehavior,

    /// If true, matches of the pattern are the chunks to keep and the text
    /// between them are the delimiters.
    pub invert: bool,
}

/// Split input strings using a pattern.
#[derive(Debug)]
pub struct Split {
    matcher: Matcher,
    behavior: SplitDelimiterBehavior,
    invert: bool,
}

impl Split {
    /// Construct a pre-tokenizer which splits input using a given pattern.
    pub fn new(opts: SplitOptions) -> Result<Self, PreTokenizeError> {
        let SplitOptions {
            pattern,
            behavior,
            invert,
        } = opts;
        let matcher = match pattern {
            SplitPattern::String(s) => Matcher::Literal(s),
            SplitPattern::Regex(pattern) => Matcher::Regex(Box::new(Regex::new(&pattern)?)),
        };
        Ok(Split {
            matcher,
            behavior,
            invert,
        })
    }

    /// Split input strings into chunks using the [`GPT2_REGEX`] pattern
    /// originating from GPT-2 and subsequently used by many other models.
    pub fn gpt2() -> Self {
        Self::new(SplitOptions {
            pattern: SplitPattern::Regex(GPT2_REGEX.to_string()),
            behavior: SplitDelimiterBehavior::Removed,
            invert: true,
        })
        .expect("should be a valid pattern")
    }
}

impl PreTokenizer for Split {
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError> {
        let matches = match &self.matcher {
            Matcher::Literal(s) if s.is_empty() => Vec::new(),
            Matcher::Literal(s) => text
                .match_indices(s.as_str())
                .map(|(pos, m)| pos..pos + m.len())
                .collect(),
            Matcher::Regex(regex) => regex_matches(regex, text)?,
        };
        Ok(pieces(
            text,
            split_ranges(text.len(), matches, self.behavior, self.invert),
        ))
    }
}

/// Pre-tokenizer for byte-level BPE models such as GPT-2.
///
/// This optionally splits text using [`GPT2_REGEX`]. Mapping of bytes to
/// vocabulary chars is performed by the [`Bpe`](crate::models::Bpe) model.
#[derive(Debug)]
pub struct ByteLevel {
    add_prefix_space: bool,
    split: Option<Split>,
}

impl ByteLevel {
    pub fn new(add_prefix_space: bool, use_regex: bool) -> ByteLevel {
        ByteLevel {
            add_prefix_space,
            split: use_regex.then(Split::gpt2),
        }
    }
}

impl PreTokenizer for ByteLevel {
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError> {
        match &self.split {
            Some(split) => split.pre_tokenize(text),
            None if text.is_empty() => Ok(Vec::new()),
            None => Ok(vec![text]),
        }
    }

    fn prefix_space(&self) -> bool {
        self.add_prefix_space
    }
}

/// Compose a sequence of pre-tokenizers.
#[derive(Debug)]
pub struct Sequence {
    pre_tokenizers: Vec<Box<dyn PreTokenizer>>,
}

impl Sequence {
    pub fn from_vec(pre_tokenizers: Vec<Box<dyn PreTokenizer>>) -> Self {
        Sequence { pre_tokenizers }
    }
}

impl PreTokenizer for Sequence {
    fn pre_tokenize<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, PreTokenizeError> {
        let mut chunks = Vec::from([text]);
        for pre_tokenizer in &self.pre_tokenizers {
            let mut next_chunks = Vec::new();
            for chunk in chunks {
                let sub_chunks = pre_tokenizer.pre_tokenize(chunk)?;
                next_chunks.extend(sub_chunks);
            }
            chunks = next_chunks;
        }
        Ok(chunks)
    }

    fn prefix_space(&self) -> bool {
        self.pre_tokenizers.iter().any(|pt| pt.prefix_space())
    }
}

#[cfg(test)]
mod tests {
    use tokenflow_testing::TestCases;

    use super::{
        Bert, ByteLevel, Digits, PreTokenizer, Punctuation, Sequence, Split, SplitOptions,
        SplitPattern, Whitespace, WhitespaceSplit,
    };
    use crate::split::SplitDelimiterBehavior;

    #[test]
    fn test_bert() {
        #[derive(Debug)]
        struct Case<'a> {
            input: &'a str,
            expected: Vec<&'a str>,
        }

        let cases = [
            Case {
                input: "foo. bar baz, meep",
                expected: ["foo", ".", "bar", "baz", ",", "meep"].into(),
            },
            Case {
                input: "ohne utf-8, ist alles kase!",
                expected: [
                    "ohne", "utf", "-", "8", ",", "ist", "alles", "kase", "!",
                ]
                .into(),
            },
            Case {
                input: "  \t ",
                expected: Vec::new(),
            },
            Case {
                input: "a...b",
                expected: ["a", ".", ".", ".", "b"].into(),
            },
        ];

        cases.test_each(|case| {
            let chunks = Bert::new().pre_tokenize(case.input).unwrap();
            assert_eq!(chunks, case.expected);
        })
    }

    #[test]
    fn test_pre_tokenize_ranges() {
        let ranges = Bert::new().pre_tokenize_ranges("ab, c").unwrap();
        assert_eq!(ranges, [0..2, 2..3, 4..5]);
    }

    #[test]
    fn test_whitespace() {
        let chunks = Whitespace::new()
            .pre_tokenize("Hey friend!!  How are you?!?")
            .unwrap();
        assert_eq!(
            chunks,
            ["Hey", "friend", "!!", "How", "are", "you", "?!?"]
        );

        let chunks = WhitespaceSplit.pre_tokenize("Hey friend!!  How").unwrap();
        assert_eq!(chunks, ["Hey", "friend!!", "How"]);
    }

    #[test]
    fn test_punctuation() {
        let chunks = Punctuation::new(SplitDelimiterBehavior::Contiguous)
            .pre_tokenize("Hey friend!!! How?")
            .unwrap();
        assert_eq!(chunks, ["Hey friend", "!!!", " How", "?"]);
    }

    #[test]
    fn test_digits() {
        #[derive(Debug)]
        struct Case<'a> {
            individual_digits: bool,
            input: &'a str,
            expected: Vec<&'a str>,
        }

        let cases = [
            Case {
                individual_digits: false,
                input: "Call 123 please",
                expected: ["Call ", "123", " please"].into(),
            },
            Case {
                individual_digits: true,
                input: "Call 123 please",
                expected: ["Call ", "1", "2", "3", " please"].into(),
            },
        ];

        cases.test_each(|case| {
            let digits = Digits::new(case.individual_digits);
            let chunks = digits.pre_tokenize(case.input).unwrap();
            assert_eq!(chunks, case.expected);
        })
    }

    #[test]
    fn test_split() {
        #[derive(Debug)]
        struct Case<'a> {
            opts: SplitOptions,
            input: &'a str,
            expected: Vec<&'a str>,
        }

        let regex = |pattern: &str| SplitPattern::Regex(pattern.to_string());

        let cases = [
            Case {
                opts: SplitOptions {
                    pattern: regex(r"\s+"),
                    behavior: SplitDelimiterBehavior::Removed,
                    invert: false,
                },
                input: "foo bar   baz meep",
                expected: ["foo", "bar", "baz", "meep"].into(),
            },
            Case {
                opts: SplitOptions {
                    pattern: regex(r"\s+"),
                    behavior: SplitDelimiterBehavior::Isolated,
                    invert: false,
                },
                input: " foo bar   baz meep ",
                expected: [" ", "foo", " ", "bar", "   ", "baz", " ", "meep", " "].into(),
            },
            Case {
                opts: SplitOptions {
                    pattern: regex(r"\s+"),
                    behavior: SplitDelimiterBehavior::Removed,
                    invert: true,
                },
                input: "foo bar   baz meep",
                expected: [" ", "   ", " "].into(),
            },
            Case {
                opts: SplitOptions {
                    pattern: SplitPattern::String("-".to_string()),
                    behavior: SplitDelimiterBehavior::MergedWithPrevious,
                    invert: false,
                },
                input: "a-b-c",
                expected: ["a-", "b-", "c"].into(),
            },
        ];

        cases.test_each(|case| {
            let split = Split::new(case.opts.clone()).unwrap();
            let chunks = split.pre_tokenize(case.input).unwrap();
            assert_eq!(chunks, case.expected);
        })
    }

    #[test]
    fn test_invalid_regex() {
        let result = Split::new(SplitOptions {
            pattern: SplitPattern::Regex("(".to_string()),
            behavior: SplitDelimiterBehavior::Removed,
            invert: false,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_byte_level() {
        let byte_level = ByteLevel::new(true, true);
        assert!(byte_level.prefix_space());
        let chunks = byte_level.pre_tokenize(" Hello world's 42").unwrap();
        assert_eq!(chunks, [" Hello", " world", "'s", " 42"]);

        let no_regex = ByteLevel::new(false, false);
        assert!(!no_regex.prefix_space());
        assert_eq!(no_regex.pre_tokenize("a b").unwrap(), ["a b"]);
    }

    #[test]
    fn test_sequence() {
        let seq = Sequence::from_vec(vec![
            Box::new(WhitespaceSplit),
            Box::new(Punctuation::new(SplitDelimiterBehavior::Removed)),
            Box::new(ByteLevel::new(true, false)),
        ]);

        let chunks = seq.pre_tokenize("foo.bar baz meep").unwrap();

        assert_eq!(chunks, ["foo", "bar", "baz", "meep"]);
        assert!(seq.prefix_space());
    }
}
