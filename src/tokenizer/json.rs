//! Deserialization of Hugging Face `tokenizer.json` files.
//!
//! The types here mirror the JSON schema. They are converted into pipeline
//! components by [`Tokenizer::from_json`](super::Tokenizer::from_json).

use std::collections::HashMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};

use super::LoadError;
use crate::padding::PaddingParams;
use crate::split::SplitDelimiterBehavior;
use crate::truncation::TruncationParams;
use crate::vocab::TokenId;

/// Enums whose variants are selected by a `type` field.
pub(crate) trait Tagged {
    /// Values of `type` that this crate understands.
    const TYPES: &'static [&'static str];
}

/// A pipeline component, or the `type` of one this crate does not support.
#[derive(Debug)]
pub(crate) enum Component<T> {
    Known(T),
    Unsupported(String),
}

impl<T> Component<T> {
    /// Return the component or a [`LoadError::Unsupported`] naming the
    /// kind of pipeline stage (eg. "normalizer").
    pub fn into_known(self, component: &'static str) -> Result<T, LoadError> {
        match self {
            Component::Known(value) => Ok(value),
            Component::Unsupported(kind) => Err(LoadError::Unsupported { component, kind }),
        }
    }
}

impl<'de, T: DeserializeOwned + Tagged> Deserialize<'de> for Component<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let kind = value
            .get("type")
            .and_then(|kind| kind.as_str())
            .map(|kind| kind.to_string());

        match kind {
            Some(kind) if !T::TYPES.contains(&kind.as_str()) => Ok(Component::Unsupported(kind)),
            _ => serde_json::from_value(value)
                .map(Component::Known)
                .map_err(D::Error::custom),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddedToken {
    pub id: TokenId,
    pub content: String,
    #[serde(default)]
    pub single_word: bool,
    #[serde(default)]
    pub lstrip: bool,
    #[serde(default)]
    pub rstrip: bool,
    #[serde(default = "default_true")]
    pub normalized: bool,
    #[serde(default)]
    pub special: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BertNormalizer {
    #[serde(default = "default_true")]
    pub clean_text: bool,
    #[serde(default = "default_true")]
    pub handle_chinese_chars: bool,
    pub strip_accents: Option<bool>,
    #[serde(default = "default_true")]
    pub lowercase: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StripNormalizer {
    #[serde(default)]
    pub strip_left: bool,
    #[serde(default)]
    pub strip_right: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum Normalizer {
    #[serde(rename = "BertNormalizer")]
    Bert(BertNormalizer),
    Lowercase,
    StripAccents,
    Strip(StripNormalizer),
    #[serde(rename = "NFC")]
    Nfc,
    #[serde(rename = "NFD")]
    Nfd,
    #[serde(rename = "NFKC")]
    Nfkc,
    #[serde(rename = "NFKD")]
    Nfkd,
    Sequence {
        normalizers: Vec<Component<Normalizer>>,
    },
}

impl Tagged for Normalizer {
    const TYPES: &'static [&'static str] = &[
        "BertNormalizer",
        "Lowercase",
        "StripAccents",
        "Strip",
        "NFC",
        "NFD",
        "NFKC",
        "NFKD",
        "Sequence",
    ];
}

#[derive(Debug, Deserialize)]
pub(crate) struct ByteLevelPreTokenizer {
    #[serde(default = "default_true")]
    pub add_prefix_space: bool,
    #[serde(default = "default_true")]
    pub use_regex: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) enum Pattern {
    String(String),
    Regex(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct SplitPreTokenizer {
    pub pattern: Pattern,
    pub behavior: SplitDelimiterBehavior,
    #[serde(default)]
    pub invert: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum PreTokenizer {
    #[serde(rename = "BertPreTokenizer")]
    Bert,
    ByteLevel(ByteLevelPreTokenizer),
    Whitespace,
    WhitespaceSplit,
    Punctuation {
        #[serde(default)]
        behavior: SplitDelimiterBehavior,
    },
    Digits {
        #[serde(default)]
        individual_digits: bool,
    },
    Split(SplitPreTokenizer),
    Sequence {
        pretokenizers: Vec<Component<PreTokenizer>>,
    },
}

impl PreTokenizer {
    /// Return true if this is, or contains, a byte-level pre-tokenizer.
    pub fn is_byte_level(&self) -> bool {
        match self {
            PreTokenizer::ByteLevel(_) => true,
            PreTokenizer::Sequence { pretokenizers } => pretokenizers
                .iter()
                .any(|pt| matches!(pt, Component::Known(pt) if pt.is_byte_level())),
            _ => false,
        }
    }
}

impl Tagged for PreTokenizer {
    const TYPES: &'static [&'static str] = &[
        "BertPreTokenizer",
        "ByteLevel",
        "Whitespace",
        "WhitespaceSplit",
        "Punctuation",
        "Digits",
        "Split",
        "Sequence",
    ];
}

/// Merges of a BPE model, either as `"a b"` strings or `["a", "b"]` pairs.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum MergeList {
    Legacy(Vec<String>),
    Tuple(Vec<(String, String)>),
}

#[derive(Debug, Deserialize)]
pub(crate) struct BpeModel {
    pub vocab: HashMap<String, TokenId>,
    pub merges: MergeList,
    #[serde(default)]
    pub unk_token: Option<String>,
    #[serde(default)]
    pub continuing_subword_prefix: Option<String>,
    #[serde(default)]
    pub end_of_word_suffix: Option<String>,
    #[serde(default)]
    pub fuse_unk: bool,
    #[serde(default)]
    pub byte_fallback: bool,
    #[serde(default)]
    pub ignore_merges: bool,
    #[serde(default)]
    pub dropout: Option<f32>,
}

fn default_unk_token() -> String {
    "[UNK]".to_string()
}

fn default_subword_prefix() -> String {
    "##".to_string()
}

fn default_max_word_len() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub(crate) struct WordPieceModel {
    pub vocab: HashMap<String, TokenId>,
    #[serde(default = "default_unk_token")]
    pub unk_token: String,
    #[serde(default = "default_subword_prefix")]
    pub continuing_subword_prefix: String,
    #[serde(default = "default_max_word_len")]
    pub max_input_chars_per_word: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum Model {
    #[serde(rename = "BPE")]
    Bpe(BpeModel),
    WordPiece(WordPieceModel),
}

impl Tagged for Model {
    const TYPES: &'static [&'static str] = &["BPE", "WordPiece"];
}

#[derive(Copy, Clone, Debug, Deserialize)]
pub(crate) enum Sequence {
    A,
    B,
}

/// Item of a template in the structured form.
#[derive(Debug, Deserialize)]
pub(crate) enum Piece {
    Sequence { id: Sequence, type_id: u32 },
    SpecialToken { id: String, type_id: u32 },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum Template {
    Pieces(Vec<Piece>),
    String(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct SpecialToken {
    pub id: String,
    pub ids: Vec<TokenId>,
    pub tokens: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum PostProcessor {
    BertProcessing {
        cls: (String, TokenId),
        sep: (String, TokenId),
    },
    RobertaProcessing {
        cls: (String, TokenId),
        sep: (String, TokenId),
        #[serde(default = "default_true")]
        trim_offsets: bool,
    },
    TemplateProcessing {
        single: Template,
        pair: Template,
        #[serde(default)]
        special_tokens: HashMap<String, SpecialToken>,
    },
    ByteLevel {
        #[serde(default = "default_true")]
        trim_offsets: bool,
    },
}

impl Tagged for PostProcessor {
    const TYPES: &'static [&'static str] = &[
        "BertProcessing",
        "RobertaProcessing",
        "TemplateProcessing",
        "ByteLevel",
    ];
}

fn default_bpe_suffix() -> String {
    "</w>".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum Decoder {
    WordPiece {
        #[serde(default = "default_subword_prefix")]
        prefix: String,
        #[serde(default = "default_true")]
        cleanup: bool,
    },
    ByteLevel,
    #[serde(rename = "BPEDecoder")]
    Bpe {
        #[serde(default = "default_bpe_suffix")]
        suffix: String,
    },
}

impl Decoder {
    pub fn is_byte_level(&self) -> bool {
        matches!(self, Decoder::ByteLevel)
    }
}

impl Tagged for Decoder {
    const TYPES: &'static [&'static str] = &["WordPiece", "ByteLevel", "BPEDecoder"];
}

/// Top-level structure of a `tokenizer.json` file.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenizerJson {
    #[serde(default)]
    pub added_tokens: Vec<AddedToken>,
    pub normalizer: Option<Component<Normalizer>>,
    pub pre_tokenizer: Option<Component<PreTokenizer>>,
    pub model: Component<Model>,
    pub post_processor: Option<Component<PostProcessor>>,
    pub decoder: Option<Component<Decoder>>,
    pub truncation: Option<TruncationParams>,
    pub padding: Option<PaddingParams>,
}

/// Parse the contents of a `tokenizer.json` file.
pub(crate) fn from_slice(json: &[u8]) -> Result<TokenizerJson, serde_json::Error> {
    serde_json::from_slice(json)
}
