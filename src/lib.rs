//! This crate provides a text tokenization engine for preparing inputs for
//! inference of machine-learning models. It loads the `tokenizer.json` files
//! produced by [HuggingFace tokenizers](https://github.com/huggingface/tokenizers)
//! and supports WordPiece (used by BERT) and Byte Pair Encoding (used by
//! GPT-2 and RoBERTa) models.
//!
//! A [`Tokenizer`] runs a pipeline of stages over each input:
//!
//! 1. Added tokens, such as `[CLS]`, are extracted from the raw text
//!    ([`added_tokens`]).
//! 2. The remaining text is normalized ([`normalizers`]). Added tokens which
//!    match normalized text are extracted, and the rest is split into words
//!    ([`pre_tokenizers`]).
//! 3. Words are converted into token IDs by a [`Model`](models::Model).
//! 4. The sequence is truncated ([`truncation`]), special tokens are inserted
//!    ([`post_processors`]) and the batch is padded ([`padding`]).
//!
//! Token IDs can be converted back to text using a decoder ([`decoders`]).
//!
//! It does not support training new vocabularies.
//!
//! ```no_run
//! use tokenflow::Tokenizer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tokenizer = Tokenizer::from_file("tokenizer.json")?;
//! let encoding = tokenizer.encode(("What is Rust?", "A language"), None)?;
//! let text = tokenizer.decode(encoding.token_ids(), true)?;
//! # Ok(())
//! # }
//! ```

pub mod added_tokens;
pub mod decoders;
pub mod encoding;
pub mod models;
pub mod normalizers;
pub mod padding;
pub mod post_processors;
pub mod pre_tokenizers;
pub mod truncation;

mod split;
mod tokenizer;
mod vocab;

pub use encoding::{Encoding, Offsets, OffsetsUnit};
pub use padding::{PaddingDirection, PaddingError, PaddingParams, PaddingStrategy};
pub use split::SplitDelimiterBehavior;
pub use tokenizer::{EncodeParams, EncoderInput, LoadError, Tokenizer, TokenizerError};
pub use truncation::{TruncationDirection, TruncationError, TruncationParams, TruncationStrategy};
pub use vocab::{TokenId, Vocab, VocabError};
