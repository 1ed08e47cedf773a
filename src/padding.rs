//! Padding of encodings to a common length.

use rayon::prelude::*;
use serde::{Deserialize, Deserializer};

use crate::encoding::{Encoded, Side};
use crate::vocab::TokenId;

/// Determines the length that encodings are padded to.
#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum PaddingStrategy {
    /// Pad to the length of the longest encoding in the batch.
    #[default]
    BatchLongest,

    /// Pad to a fixed length. Longer encodings are left unchanged.
    Fixed(usize),
}

/// Side of an encoding that padding tokens are added to.
#[derive(Copy, Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub enum PaddingDirection {
    Left,
    #[default]
    Right,
}

impl From<PaddingDirection> for Side {
    fn from(direction: PaddingDirection) -> Side {
        match direction {
            PaddingDirection::Left => Side::Left,
            PaddingDirection::Right => Side::Right,
        }
    }
}

/// Padding configuration of a [`Tokenizer`](crate::Tokenizer).
///
/// This deserializes from the `padding` block of a `tokenizer.json` file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct PaddingParams {
    #[serde(default)]
    pub strategy: PaddingStrategy,

    #[serde(default)]
    pub direction: PaddingDirection,

    /// If non-zero, the padded length is rounded up to a multiple of this
    /// value.
    #[serde(default, deserialize_with = "null_as_zero")]
    pub pad_to_multiple_of: usize,

    #[serde(default)]
    pub pad_id: TokenId,

    #[serde(default)]
    pub pad_type_id: u32,

    #[serde(default = "default_pad_token")]
    pub pad_token: String,
}

fn default_pad_token() -> String {
    "[PAD]".to_string()
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    Ok(Option::<usize>::deserialize(deserializer)?.unwrap_or(0))
}

impl Default for PaddingParams {
    fn default() -> Self {
        PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            direction: PaddingDirection::Right,
            pad_to_multiple_of: 0,
            pad_id: 0,
            pad_type_id: 0,
            pad_token: default_pad_token(),
        }
    }
}

impl PaddingParams {
    /// Return the length that a batch whose longest encoding has `max_len`
    /// tokens is padded to.
    fn target_len(&self, max_len: usize) -> Result<usize, PaddingError> {
        let len = match self.strategy {
            PaddingStrategy::Fixed(0) => return Err(PaddingError::ZeroFixedLength),
            PaddingStrategy::Fixed(len) => len,
            PaddingStrategy::BatchLongest => max_len,
        };
        Ok(match self.pad_to_multiple_of {
            0 => len,
            multiple => len.div_ceil(multiple) * multiple,
        })
    }
}

/// Errors that occur when padding parameters are applied to a batch.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PaddingError {
    #[error("fixed padding length must be greater than zero")]
    ZeroFixedLength,
}

/// Pad each encoding in `encodings`, and its overflowing parts, to the length
/// given by `params`.
///
/// For [`PaddingStrategy::BatchLongest`] the target is the length of the
/// longest main encoding.
pub(crate) fn pad_encodings(
    encodings: &mut [Encoded],
    params: &PaddingParams,
) -> Result<(), PaddingError> {
    let max_len = encodings.iter().map(|e| e.len()).max().unwrap_or(0);
    let target_len = params.target_len(max_len)?;
    let side = Side::from(params.direction);

    encodings.par_iter_mut().for_each(|encoded| {
        encoded.pad(
            target_len,
            params.pad_id,
            params.pad_type_id,
            &params.pad_token,
            side,
        )
    });
    Ok(())
}
