//! Internal helpers for splitting strings and slices.

use std::ops::Range;

use serde::Deserialize;

pub trait SliceExt<T> {
    /// Return the range of `sub` within `self`, if `sub` is a sub-slice of
    /// `self` (ie. it points into the same memory).
    fn subslice_offsets(&self, sub: &[T]) -> Option<Range<usize>>;
}

impl<T> SliceExt<T> for [T] {
    fn subslice_offsets(&self, sub: &[T]) -> Option<Range<usize>> {
        let elem_size = std::mem::size_of::<T>().max(1);
        let base = self.as_ptr() as usize;
        let sub_start = sub.as_ptr() as usize;
        if sub_start < base {
            return None;
        }
        let start = (sub_start - base) / elem_size;
        let end = start + sub.len();
        (end <= self.len()).then_some(start..end)
    }
}

/// Specifies how the delimiters found while splitting a string are handled.
///
/// The variant names match the `behavior` field of splitting pre-tokenizers
/// in `tokenizer.json` files.
#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum SplitDelimiterBehavior {
    /// Exclude the delimiter from the output.
    Removed,

    /// Add the delimiter to the output as its own piece.
    #[default]
    Isolated,

    /// Append the delimiter to the piece before it.
    MergedWithPrevious,

    /// Prepend the delimiter to the piece after it.
    MergedWithNext,

    /// Join consecutive delimiters into one piece.
    Contiguous,
}

/// Split the range `0..len` into pieces using a sorted list of
/// non-overlapping `matches` and combine the pieces according to `behavior`.
///
/// If `invert` is true, the matches are treated as the content to keep and
/// the text between them as delimiters.
///
/// Empty pieces are never returned.
pub fn split_ranges(
    len: usize,
    matches: impl IntoIterator<Item = Range<usize>>,
    behavior: SplitDelimiterBehavior,
    invert: bool,
) -> Vec<Range<usize>> {
    // Label every part of the input as either a delimiter or not.
    let mut parts: Vec<(Range<usize>, bool)> = Vec::new();
    let mut prev_end = 0;
    for m in matches {
        if m.start > prev_end {
            parts.push((prev_end..m.start, invert));
        }
        if !m.is_empty() {
            prev_end = m.end;
            parts.push((m, !invert));
        }
    }
    if prev_end < len {
        parts.push((prev_end..len, invert));
    }

    let mut pieces: Vec<Range<usize>> = Vec::with_capacity(parts.len());
    match behavior {
        SplitDelimiterBehavior::Removed => {
            pieces.extend(
                parts
                    .into_iter()
                    .filter(|(_, is_delim)| !is_delim)
                    .map(|(r, _)| r),
            );
        }
        SplitDelimiterBehavior::Isolated => {
            pieces.extend(parts.into_iter().map(|(r, _)| r));
        }
        SplitDelimiterBehavior::MergedWithPrevious => {
            let mut prev_delim = false;
            for (range, is_delim) in parts {
                match pieces.last_mut() {
                    Some(last) if is_delim && !prev_delim => last.end = range.end,
                    _ => pieces.push(range),
                }
                prev_delim = is_delim;
            }
        }
        SplitDelimiterBehavior::MergedWithNext => {
            let mut next_delim = false;
            for (range, is_delim) in parts.into_iter().rev() {
                match pieces.last_mut() {
                    Some(last) if is_delim && !next_delim => last.start = range.start,
                    _ => pieces.push(range),
                }
                next_delim = is_delim;
            }
            pieces.reverse();
        }
        SplitDelimiterBehavior::Contiguous => {
            let mut prev_delim: Option<bool> = None;
            for (range, is_delim) in parts {
                match pieces.last_mut() {
                    Some(last) if prev_delim == Some(is_delim) && is_delim => {
                        last.end = range.end
                    }
                    _ => pieces.push(range),
                }
                prev_delim = Some(is_delim);
            }
        }
    }
    pieces.retain(|r| !r.is_empty());
    pieces
}

/// Return the byte ranges of each char in `text` for which `predicate` is
/// true.
pub fn char_matches(text: &str, predicate: impl Fn(char) -> bool) -> Vec<Range<usize>> {
    text.char_indices()
        .filter(|(_, ch)| predicate(*ch))
        .map(|(pos, ch)| pos..pos + ch.len_utf8())
        .collect()
}

#[cfg(test)]
mod tests {
    use tokenflow_testing::TestCases;

    use super::{char_matches, split_ranges, SliceExt, SplitDelimiterBehavior};

    #[test]
    fn test_subslice_offsets() {
        let text = "foo bar baz";
        let bytes = text.as_bytes();
        assert_eq!(bytes.subslice_offsets(&bytes[4..7]), Some(4..7));
        let other = b"bar".to_vec();
        assert_eq!(bytes.subslice_offsets(&other), None);
    }

    #[test]
    fn test_split_ranges() {
        #[derive(Debug)]
        struct Case<'a> {
            behavior: SplitDelimiterBehavior,
            invert: bool,
            expected: &'a [&'a str],
        }

        let text = "a--b-c";
        let cases = [
            Case {
                behavior: SplitDelimiterBehavior::Removed,
                invert: false,
                expected: &["a", "b", "c"],
            },
            Case {
                behavior: SplitDelimiterBehavior::Isolated,
                invert: false,
                expected: &["a", "-", "-", "b", "-", "c"],
            },
            Case {
                behavior: SplitDelimiterBehavior::MergedWithPrevious,
                invert: false,
                expected: &["a-", "-", "b-", "c"],
            },
            Case {
                behavior: SplitDelimiterBehavior::MergedWithNext,
                invert: false,
                expected: &["a", "-", "-b", "-c"],
            },
            Case {
                behavior: SplitDelimiterBehavior::Contiguous,
                invert: false,
                expected: &["a", "--", "b", "-", "c"],
            },
            Case {
                behavior: SplitDelimiterBehavior::Removed,
                invert: true,
                expected: &["-", "-", "-"],
            },
        ];

        cases.test_each(|case| {
            let matches = char_matches(text, |ch| ch == '-');
            let pieces: Vec<&str> = split_ranges(text.len(), matches, case.behavior, case.invert)
                .into_iter()
                .map(|r| &text[r])
                .collect();
            assert_eq!(pieces, case.expected);
        })
    }
}
