//! Truncation of encoded sequences to a maximum length.

use serde::Deserialize;

use crate::encoding::{Encoded, Side};

/// Side of a sequence from which tokens are removed.
#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum TruncationDirection {
    /// Remove tokens from the start.
    Left,
    /// Remove tokens from the end.
    #[default]
    Right,
}

impl From<TruncationDirection> for Side {
    fn from(direction: TruncationDirection) -> Side {
        match direction {
            TruncationDirection::Left => Side::Left,
            TruncationDirection::Right => Side::Right,
        }
    }
}

/// Which sequence(s) of a pair tokens are removed from.
#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum TruncationStrategy {
    /// Repeatedly remove a token from the longer sequence, or the first
    /// sequence if both have the same length.
    #[default]
    LongestFirst,
    /// Only remove tokens from the first sequence.
    OnlyFirst,
    /// Only remove tokens from the second sequence.
    OnlySecond,
}

/// Truncation configuration of a [`Tokenizer`](crate::Tokenizer).
///
/// This deserializes from the `truncation` block of a `tokenizer.json` file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TruncationParams {
    #[serde(default)]
    pub direction: TruncationDirection,

    /// Maximum number of tokens in an encoding, including special tokens
    /// added by the post-processor.
    pub max_length: usize,

    #[serde(default)]
    pub strategy: TruncationStrategy,

    /// Number of tokens shared by consecutive overflowing parts.
    #[serde(default)]
    pub stride: usize,
}

impl Default for TruncationParams {
    fn default() -> Self {
        TruncationParams {
            direction: TruncationDirection::Right,
            max_length: 512,
            strategy: TruncationStrategy::LongestFirst,
            stride: 0,
        }
    }
}

/// Errors that occur when truncation parameters are applied to an encoding.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TruncationError {
    #[error("truncation max_length must be greater than zero")]
    ZeroMaxLength,

    /// `max_length` leaves no room for the special tokens which the
    /// post-processor adds.
    #[error(
        "truncation max_length {max_length} cannot fit the {added_tokens} special tokens added by the post-processor"
    )]
    MaxLengthTooSmall {
        max_length: usize,
        added_tokens: usize,
    },

    #[error("truncation stride {stride} must be less than the truncated sequence length {length}")]
    StrideTooLarge { stride: usize, length: usize },

    /// The sequence that the strategy truncates is not long enough.
    #[error(
        "cannot remove {to_remove} tokens from the {sequence} sequence of {length} tokens using strategy {strategy:?}"
    )]
    SequenceTooShort {
        strategy: TruncationStrategy,
        sequence: &'static str,
        length: usize,
        to_remove: usize,
    },

    #[error("truncation strategy OnlySecond requires a pair of sequences")]
    SecondSequenceNotProvided,
}

/// Truncate the encoding of one or two sequences, before post-processing,
/// so that the total length including `added_tokens` special tokens does not
/// exceed `params.max_length`.
pub(crate) fn truncate_encodings(
    first: Encoded,
    second: Option<Encoded>,
    params: &TruncationParams,
    added_tokens: usize,
) -> Result<(Encoded, Option<Encoded>), TruncationError> {
    let TruncationParams {
        direction,
        max_length,
        strategy,
        stride,
    } = *params;

    if max_length == 0 {
        return Err(TruncationError::ZeroMaxLength);
    }
    if max_length < added_tokens {
        return Err(TruncationError::MaxLengthTooSmall {
            max_length,
            added_tokens,
        });
    }

    let max_len = max_length - added_tokens;
    let total_len = first.len() + second.as_ref().map_or(0, |s| s.len());
    if total_len <= max_len {
        return Ok((first, second));
    }
    let to_remove = total_len - max_len;
    let side = Side::from(direction);

    let truncate = |encoded: Encoded, len: usize| {
        if len > 0 && len < encoded.len() && stride >= len {
            return Err(TruncationError::StrideTooLarge {
                stride,
                length: len,
            });
        }
        Ok(encoded.truncate(len, stride, side))
    };

    match strategy {
        TruncationStrategy::LongestFirst => match second {
            None => Ok((truncate(first, max_len)?, None)),
            Some(second) => {
                let (mut first_len, mut second_len) = (first.len(), second.len());
                for _ in 0..to_remove {
                    if first_len >= second_len {
                        first_len -= 1;
                    } else {
                        second_len -= 1;
                    }
                }
                Ok((
                    truncate(first, first_len)?,
                    Some(truncate(second, second_len)?),
                ))
            }
        },
        TruncationStrategy::OnlyFirst => {
            if first.len() <= to_remove {
                return Err(TruncationError::SequenceTooShort {
                    strategy,
                    sequence: "first",
                    length: first.len(),
                    to_remove,
                });
            }
            let len = first.len() - to_remove;
            Ok((truncate(first, len)?, second))
        }
        TruncationStrategy::OnlySecond => {
            let second = second.ok_or(TruncationError::SecondSequenceNotProvided)?;
            if second.len() <= to_remove {
                return Err(TruncationError::SequenceTooShort {
                    strategy,
                    sequence: "second",
                    length: second.len(),
                    to_remove,
                });
            }
            let len = second.len() - to_remove;
            Ok((first, Some(truncate(second, len)?)))
        }
    }
}
