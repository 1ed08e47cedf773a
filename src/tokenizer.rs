//! Defines the [`Tokenizer`] type that implements the tokenization pipeline.
//!
//! There are two ways to construct a tokenizer:
//!
//! 1. Load a preconfigured tokenizer from JSON, using [`Tokenizer::from_json`],
//!    [`Tokenizer::from_bytes`] or [`Tokenizer::from_file`]. This crate
//!    supports the `tokenizer.json` format that Hugging Face Tokenizers
//!    generates, for WordPiece and BPE models.
//!
//! 2. Manually configure a [`Tokenizer`] by creating a [`Model`]
//!    implementation, such as [`WordPiece`], wrapping it with
//!    [`Tokenizer::new`] and adding the other pipeline stages with the
//!    `with_*` methods.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};
use rayon::prelude::*;

use crate::added_tokens::{AddedToken, AddedVocabulary, Segment};
use crate::decoders::{self, join_with_spaces, DecodeError, Decoder};
use crate::encoding::{Encoded, Encoding, Fields, OffsetMapper, OffsetsUnit};
use crate::models::{
    merge_pairs_from_lines, Bpe, BpeError, BpeOptions, Model, WordPiece, WordPieceOptions,
};
use crate::normalizers::{self, NormalizedText, Normalizer};
use crate::padding::{pad_encodings, PaddingError, PaddingParams};
use crate::post_processors::{
    self, post_process, Piece, PostProcessError, PostProcessor, SpecialToken, Template,
    TemplateProcessing,
};
use crate::pre_tokenizers::{self, PreTokenizeError, PreTokenizer, SplitOptions, SplitPattern};
use crate::truncation::{truncate_encodings, TruncationError, TruncationParams};
use crate::vocab::{TokenId, VocabError};

mod json;

/// Input sequences for [`Tokenizer::encode`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EncoderInput<'a> {
    /// Input with a single sequence.
    Item(&'a str),

    /// Input with a pair of sequences. Used in tasks such as extractive
    /// question answering, where the sequence is `(query, context)`.
    Pair((&'a str, &'a str)),
}

/// Construct a tokenizer input with a single sequence.
impl<'a> From<&'a str> for EncoderInput<'a> {
    fn from(val: &'a str) -> EncoderInput<'a> {
        EncoderInput::Item(val)
    }
}

/// Construct a tokenizer input with a pair of sequences.
impl<'a> From<(&'a str, &'a str)> for EncoderInput<'a> {
    fn from(val: (&'a str, &'a str)) -> EncoderInput<'a> {
        EncoderInput::Pair(val)
    }
}

/// Options for a single call to [`Tokenizer::encode`] or
/// [`Tokenizer::encode_batch`].
///
/// The `return_*` flags select which optional fields of the [`Encoding`] are
/// populated. Token IDs are always returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeParams {
    /// Insert special tokens (eg. `[CLS]`, `[SEP]`) using the tokenizer's
    /// post-processor.
    pub add_special_tokens: bool,

    pub return_tokens: bool,
    pub return_type_ids: bool,
    pub return_special_tokens_mask: bool,
    pub return_attention_mask: bool,
    pub return_offsets: bool,

    /// Unit of the offsets returned when `return_offsets` is set.
    pub offsets_unit: OffsetsUnit,
}

impl Default for EncodeParams {
    fn default() -> Self {
        EncodeParams {
            add_special_tokens: true,
            return_tokens: false,
            return_type_ids: false,
            return_special_tokens_mask: false,
            return_attention_mask: false,
            return_offsets: false,
            offsets_unit: OffsetsUnit::Byte,
        }
    }
}

/// Errors returned when loading a tokenizer from `tokenizer.json` data.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// There was an error reading the JSON data from a file.
    #[error("failed to read tokenizer file: {0}")]
    Io(#[from] std::io::Error),

    /// There was an error decoding the JSON data.
    #[error("failed to parse tokenizer JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline component has a type this crate does not support.
    #[error("unsupported {component} type \"{kind}\"")]
    Unsupported {
        component: &'static str,
        kind: String,
    },

    #[error("invalid BPE model: {0}")]
    Bpe(#[from] BpeError),

    #[error("invalid vocabulary: {0}")]
    Vocab(#[from] VocabError),

    #[error("invalid pre-tokenizer: {0}")]
    PreTokenize(#[from] PreTokenizeError),

    #[error("invalid post-processor: {0}")]
    PostProcess(#[from] PostProcessError),

    /// The matcher for added tokens could not be built.
    #[error("invalid added tokens: {0}")]
    AddedTokens(#[from] aho_corasick::BuildError),
}

/// Error type returned when tokenizing or decoding.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TokenizerError {
    /// The tokenizer was released with [`Tokenizer::release`].
    #[error("tokenizer has been released")]
    Released,

    #[error("cannot encode an empty batch")]
    EmptyBatch,

    /// A token passed to [`Tokenizer::token_to_id`] is not in the vocabulary.
    #[error("token \"{0}\" is not in the vocabulary")]
    TokenNotFound(String),

    /// An error occurred while performing pre-tokenization to split the input.
    #[error("pre-tokenization failed: {0}")]
    PreTokenize(#[from] PreTokenizeError),

    /// The truncation parameters could not be applied to the input.
    #[error("truncation failed: {0}")]
    Truncation(#[from] TruncationError),

    /// The padding parameters could not be applied to the batch.
    #[error("padding failed: {0}")]
    Padding(#[from] PaddingError),

    /// Decoding token IDs into text failed.
    #[error("decoding failed: {0}")]
    Decode(#[from] DecodeError),
}

/// The components of a tokenizer which are shared between clones.
#[derive(Clone, Debug)]
struct Pipeline {
    normalizer: Option<Arc<dyn Normalizer>>,
    pre_tokenizer: Option<Arc<dyn PreTokenizer>>,
    model: Arc<dyn Model>,
    post_processor: Option<Arc<dyn PostProcessor>>,

    /// Decoder used to join tokens. If `None`, tokens are joined with spaces.
    decoder: Option<Arc<dyn Decoder>>,
    added_tokens: AddedVocabulary,
}

impl Pipeline {
    /// Normalize, pre-tokenize and encode a run of text that contains no
    /// raw added tokens. `char_offset` is the char position of `text` in the
    /// sequence it came from.
    fn encode_text(
        &self,
        text: &str,
        char_offset: usize,
        mapper: &OffsetMapper,
        unit: OffsetsUnit,
        out: &mut Encoded,
    ) -> Result<(), PreTokenizeError> {
        let mut normalized = NormalizedText::new(text, char_offset);
        if let Some(normalizer) = &self.normalizer {
            normalized = normalizer.normalize(normalized);
        }

        for segment in self.added_tokens.split_normalized(normalized.as_str()) {
            match segment {
                Segment::Token(id, range) => {
                    let chars = normalized
                        .original_range(range)
                        .unwrap_or(char_offset..char_offset);
                    let content = self.added_tokens.id_to_token(id).unwrap_or_default();
                    out.push_token(id, content, mapper.offsets(chars, unit));
                }
                Segment::Text(range) => {
                    let words = normalized.slice(range);
                    self.encode_words(words, char_offset, mapper, unit, out)?;
                }
            }
        }

        Ok(())
    }

    /// Pre-tokenize normalized text and encode each word with the model.
    fn encode_words(
        &self,
        mut normalized: NormalizedText,
        char_offset: usize,
        mapper: &OffsetMapper,
        unit: OffsetsUnit,
        out: &mut Encoded,
    ) -> Result<(), PreTokenizeError> {
        if let Some(pre_tokenizer) = &self.pre_tokenizer {
            if pre_tokenizer.prefix_space() && !normalized.as_str().starts_with(char::is_whitespace)
            {
                normalized.prepend(" ");
            }
        }

        let normalized_str = normalized.as_str();
        let words = match &self.pre_tokenizer {
            Some(pre_tokenizer) => pre_tokenizer.pre_tokenize_ranges(normalized_str)?,
            None if normalized_str.is_empty() => Vec::new(),
            None => vec![0..normalized_str.len()],
        };

        for word_range in words {
            let word = &normalized_str[word_range.clone()];
            self.model.encode_with_offsets(word, &mut |range, id| {
                let start = word_range.start + range.start;
                let end = word_range.start + range.end;
                let chars = normalized
                    .original_range(start..end)
                    .unwrap_or(char_offset..char_offset);
                let token = self.model.id_to_token(id).unwrap_or_default();
                out.push_token(id, token, mapper.offsets(chars, unit));
            });
        }

        Ok(())
    }

    /// Encode one input sequence, collecting `fields`.
    fn encode_sequence(
        &self,
        text: &str,
        fields: Fields,
        unit: OffsetsUnit,
    ) -> Result<Encoded, PreTokenizeError> {
        let mapper = OffsetMapper::new(text);
        let mut encoded = Encoded::with_fields(fields, text.len() / 4);

        for segment in self.added_tokens.split(text) {
            match segment {
                Segment::Token(id, range) => {
                    let chars = mapper.byte_to_char(range.start)..mapper.byte_to_char(range.end);
                    let content = self.added_tokens.id_to_token(id).unwrap_or_default();
                    encoded.push_token(id, content, mapper.offsets(chars, unit));
                }
                Segment::Text(range) => {
                    let char_offset = mapper.byte_to_char(range.start);
                    self.encode_text(&text[range], char_offset, &mapper, unit, &mut encoded)?;
                }
            }
        }

        Ok(encoded)
    }

    /// Run the full pipeline for one input, except padding.
    fn encode_input(
        &self,
        input: EncoderInput,
        params: &EncodeParams,
        truncation: Option<&TruncationParams>,
    ) -> Result<Encoded, TokenizerError> {
        let (first, second) = match input {
            EncoderInput::Item(first) => (first, None),
            EncoderInput::Pair((first, second)) => (first, Some(second)),
        };

        let fields = Fields::from(params);
        let first = self.encode_sequence(first, fields, params.offsets_unit)?;
        let second = second
            .map(|second| self.encode_sequence(second, fields, params.offsets_unit))
            .transpose()?;

        let processor = self.post_processor.as_deref();
        let (first, second) = match truncation {
            Some(truncation) => {
                let added_tokens = match processor {
                    Some(processor) if params.add_special_tokens => {
                        processor.added_tokens(second.is_some())
                    }
                    _ => 0,
                };
                truncate_encodings(first, second, truncation, added_tokens)?
            }
            None => (first, second),
        };

        Ok(post_process(
            processor,
            first,
            second,
            params.add_special_tokens,
        ))
    }

    /// Look up the string for a token ID, checking added tokens first.
    ///
    /// IDs which are not in the vocabulary map to the unknown token, if the
    /// model has one.
    fn id_to_token(&self, id: TokenId) -> Result<&str, DecodeError> {
        self.added_tokens
            .id_to_token(id)
            .or_else(|| self.model.id_to_token(id))
            .or_else(|| self.model.vocab().unknown_token())
            .ok_or(DecodeError::InvalidTokenId(id))
    }

    /// IDs of added special tokens and tokens the post-processor inserts.
    fn special_ids(&self) -> HashSet<TokenId> {
        let mut ids: HashSet<TokenId> = self.added_tokens.special_ids().collect();
        if let Some(processor) = &self.post_processor {
            ids.extend(processor.special_token_ids());
        }
        ids
    }
}

/// Tokenizes text inputs into sequences of token IDs that can be fed to a
/// machine learning model, and decodes token IDs back into text.
///
/// `Tokenizer` wraps a [`Model`] which handles specific methods of encoding of
/// individual words (eg. WordPiece, Byte Pair Encoding) and adds normalization,
/// pre-tokenization, special tokens, truncation and padding around it.
///
/// Clones share the pipeline but have independent truncation, padding and
/// encode parameters. Configuration methods take `&mut self`, so the borrow
/// checker rules out changing them while an encode is in progress.
#[derive(Clone, Debug)]
pub struct Tokenizer {
    /// `None` once the tokenizer has been released.
    pipeline: Option<Arc<Pipeline>>,
    truncation: Option<TruncationParams>,
    padding: Option<PaddingParams>,
    encode_params: EncodeParams,
}

impl Tokenizer {
    /// Create a new tokenizer which wraps the given model.
    ///
    /// The tokenizer initially has no normalizer, pre-tokenizer or
    /// post-processor, and decodes using the model's default decoder.
    pub fn new<M: Model + 'static>(model: M) -> Tokenizer {
        Self::from_model(Arc::new(model))
    }

    fn from_model(model: Arc<dyn Model>) -> Tokenizer {
        let decoder = model.default_decoder().map(Arc::from);
        Tokenizer {
            pipeline: Some(Arc::new(Pipeline {
                normalizer: None,
                pre_tokenizer: None,
                model,
                post_processor: None,
                decoder,
                added_tokens: AddedVocabulary::default(),
            })),
            truncation: None,
            padding: None,
            encode_params: EncodeParams::default(),
        }
    }

    fn update_pipeline(mut self, update: impl FnOnce(&mut Pipeline)) -> Self {
        if let Some(pipeline) = self.pipeline.as_mut() {
            update(Arc::make_mut(pipeline));
        }
        self
    }

    fn try_update_pipeline(
        mut self,
        update: impl FnOnce(&mut Pipeline) -> Result<(), LoadError>,
    ) -> Result<Self, LoadError> {
        if let Some(pipeline) = self.pipeline.as_mut() {
            update(Arc::make_mut(pipeline))?;
        }
        Ok(self)
    }

    /// Configure the normalizer used by this tokenizer.
    ///
    /// Added tokens which are matched against normalized text are
    /// normalized again using the new normalizer.
    pub fn with_normalizer(self, normalizer: Box<dyn Normalizer>) -> Result<Self, LoadError> {
        self.try_update_pipeline(|p| {
            let normalizer: Arc<dyn Normalizer> = normalizer.into();
            p.added_tokens = p.added_tokens.with_normalizer(Some(normalizer.as_ref()))?;
            p.normalizer = Some(normalizer);
            Ok(())
        })
    }

    /// Configure the pre-tokenizer used by this tokenizer.
    pub fn with_pre_tokenizer(self, pre_tokenizer: Box<dyn PreTokenizer>) -> Self {
        self.update_pipeline(|p| p.pre_tokenizer = Some(pre_tokenizer.into()))
    }

    /// Configure the post-processor which adds special tokens.
    pub fn with_post_processor(self, post_processor: Box<dyn PostProcessor>) -> Self {
        self.update_pipeline(|p| p.post_processor = Some(post_processor.into()))
    }

    /// Replace the decoder used by [`Tokenizer::decode`].
    pub fn with_decoder(self, decoder: Box<dyn Decoder>) -> Self {
        self.update_pipeline(|p| p.decoder = Some(decoder.into()))
    }

    /// Configure the tokens which are matched literally in the input.
    ///
    /// Tokens with `normalized` set are matched in the output of the
    /// normalizer, after being normalized themselves. The others are matched
    /// in the raw input.
    pub fn with_added_tokens(self, tokens: Vec<AddedToken>) -> Result<Self, LoadError> {
        self.try_update_pipeline(|p| {
            p.added_tokens = AddedVocabulary::new(tokens, p.normalizer.as_deref())?;
            Ok(())
        })
    }

    /// Load a tokenizer from a Hugging Face `tokenizer.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Tokenizer, LoadError> {
        let content = std::fs::read(path)?;
        Self::from_bytes(&content)
    }

    /// Load a tokenizer from the contents of a Hugging Face `tokenizer.json`
    /// file.
    pub fn from_json(json: &str) -> Result<Tokenizer, LoadError> {
        Self::from_bytes(json.as_bytes())
    }

    /// Load a tokenizer from the UTF-8 encoded contents of a Hugging Face
    /// `tokenizer.json` file.
    pub fn from_bytes(json: &[u8]) -> Result<Tokenizer, LoadError> {
        let tokenizer_json = json::from_slice(json)?;
        Self::from_parsed_json(tokenizer_json)
    }

    fn from_parsed_json(json: json::TokenizerJson) -> Result<Tokenizer, LoadError> {
        let normalizer = json
            .normalizer
            .map(|normalizer| build_normalizer(normalizer.into_known("normalizer")?))
            .transpose()?;
        let pre_tokenizer = json
            .pre_tokenizer
            .map(|pt| pt.into_known("pre-tokenizer"))
            .transpose()?;
        let decoder = json
            .decoder
            .map(|decoder| decoder.into_known("decoder"))
            .transpose()?;

        let byte_level = pre_tokenizer.as_ref().is_some_and(|pt| pt.is_byte_level())
            || decoder.as_ref().is_some_and(|d| d.is_byte_level());
        let pre_tokenizer = pre_tokenizer.map(build_pre_tokenizer).transpose()?;

        let (model, kind): (Arc<dyn Model>, &str) = match json.model.into_known("model")? {
            json::Model::Bpe(model) => {
                if model.dropout.is_some() {
                    warn!("BPE dropout is only used in training and will be ignored");
                }
                let merges: Vec<(&str, &str)> = match &model.merges {
                    json::MergeList::Legacy(lines) => merge_pairs_from_lines(lines),
                    json::MergeList::Tuple(pairs) => pairs
                        .iter()
                        .map(|(a, b)| (a.as_str(), b.as_str()))
                        .collect(),
                };
                let model = Bpe::new(BpeOptions {
                    merges: &merges,
                    vocab: model.vocab,
                    unk_token: model.unk_token,
                    continuing_subword_prefix: model.continuing_subword_prefix,
                    end_of_word_suffix: model.end_of_word_suffix,
                    fuse_unk: model.fuse_unk,
                    byte_fallback: model.byte_fallback,
                    ignore_merges: model.ignore_merges,
                    byte_level,
                })?;
                (Arc::new(model), "BPE")
            }
            json::Model::WordPiece(model) => {
                let model = WordPiece::from_vocab(
                    model.vocab,
                    WordPieceOptions {
                        max_word_len: Some(model.max_input_chars_per_word),
                        subword_prefix: Some(model.continuing_subword_prefix),
                        unk_token: Some(model.unk_token),
                    },
                )?;
                (Arc::new(model), "WordPiece")
            }
        };

        let post_processor = json
            .post_processor
            .map(|pp| build_post_processor(pp.into_known("post-processor")?))
            .transpose()?;

        let added_tokens: Vec<AddedToken> = json
            .added_tokens
            .into_iter()
            .map(|token| AddedToken {
                id: token.id,
                content: token.content,
                special: token.special,
                single_word: token.single_word,
                lstrip: token.lstrip,
                rstrip: token.rstrip,
                normalized: token.normalized,
            })
            .collect();
        let n_added_tokens = added_tokens.len();

        let mut tokenizer = Tokenizer::from_model(model);
        if let Some(normalizer) = normalizer {
            tokenizer = tokenizer.with_normalizer(normalizer)?;
        }
        tokenizer = tokenizer.with_added_tokens(added_tokens)?;
        if let Some(pre_tokenizer) = pre_tokenizer {
            tokenizer = tokenizer.with_pre_tokenizer(pre_tokenizer);
        }
        if let Some(post_processor) = post_processor {
            tokenizer = tokenizer.with_post_processor(post_processor);
        }
        if let Some(decoder) = decoder {
            tokenizer = tokenizer.with_decoder(build_decoder(decoder));
        }
        tokenizer.truncation = json.truncation;
        tokenizer.padding = json.padding;

        debug!(
            "loaded {} tokenizer with {} vocabulary entries and {} added tokens",
            kind,
            tokenizer.vocab_size().unwrap_or(0),
            n_added_tokens
        );

        Ok(tokenizer)
    }

    fn pipeline(&self) -> Result<&Pipeline, TokenizerError> {
        self.pipeline.as_deref().ok_or(TokenizerError::Released)
    }

    /// Return the model used to convert words to token IDs.
    pub fn model(&self) -> Result<&dyn Model, TokenizerError> {
        Ok(self.pipeline()?.model.as_ref())
    }

    /// Return the parameters used by encode calls which don't specify any.
    pub fn encode_params(&self) -> &EncodeParams {
        &self.encode_params
    }

    /// Replace the parameters used by encode calls which don't specify any.
    pub fn set_encode_params(&mut self, params: EncodeParams) -> Result<(), TokenizerError> {
        self.pipeline()?;
        self.encode_params = params;
        Ok(())
    }

    /// Return the current truncation parameters, or `None` if truncation is
    /// disabled.
    pub fn truncation(&self) -> Result<Option<&TruncationParams>, TokenizerError> {
        self.pipeline()?;
        Ok(self.truncation.as_ref())
    }

    /// Enable truncation with the given parameters.
    ///
    /// The parameters are validated when an input is encoded, since whether
    /// they are valid depends on the number of special tokens added.
    pub fn set_truncation(&mut self, params: TruncationParams) -> Result<(), TokenizerError> {
        self.pipeline()?;
        debug!("set truncation {:?}", params);
        self.truncation = Some(params);
        Ok(())
    }

    /// Disable truncation.
    pub fn clear_truncation(&mut self) -> Result<(), TokenizerError> {
        self.pipeline()?;
        debug!("cleared truncation");
        self.truncation = None;
        Ok(())
    }

    /// Return the current padding parameters, or `None` if padding is
    /// disabled.
    pub fn padding(&self) -> Result<Option<&PaddingParams>, TokenizerError> {
        self.pipeline()?;
        Ok(self.padding.as_ref())
    }

    /// Enable padding with the given parameters.
    pub fn set_padding(&mut self, params: PaddingParams) -> Result<(), TokenizerError> {
        self.pipeline()?;
        debug!("set padding {:?}", params);
        self.padding = Some(params);
        Ok(())
    }

    /// Disable padding.
    pub fn clear_padding(&mut self) -> Result<(), TokenizerError> {
        self.pipeline()?;
        debug!("cleared padding");
        self.padding = None;
        Ok(())
    }

    /// Encode one or two sequences into a sequence of tokens.
    ///
    /// The input can be an `&str` or tuple of `(&str, &str)`. If `params` is
    /// `None`, the tokenizer's [`encode_params`](Tokenizer::encode_params)
    /// are used. When padding is enabled, the input is padded as a batch of
    /// one.
    pub fn encode<'a, I: Into<EncoderInput<'a>>>(
        &self,
        input: I,
        params: Option<&EncodeParams>,
    ) -> Result<Encoding, TokenizerError> {
        let pipeline = self.pipeline()?;
        let params = params.unwrap_or(&self.encode_params);

        let mut encoded = [pipeline.encode_input(input.into(), params, self.truncation.as_ref())?];
        if let Some(padding) = &self.padding {
            pad_encodings(&mut encoded, padding)?;
        }
        let [encoded] = encoded;

        Ok(encoded.into_encoding(params))
    }

    /// Encode a batch of inputs in parallel.
    ///
    /// Returns one encoding per input, in the same order. When padding is
    /// enabled with [`PaddingStrategy::BatchLongest`](crate::PaddingStrategy::BatchLongest),
    /// all encodings are padded to the length of the longest one.
    pub fn encode_batch<'a, I: Into<EncoderInput<'a>> + Copy + Sync>(
        &self,
        inputs: &[I],
        params: Option<&EncodeParams>,
    ) -> Result<Vec<Encoding>, TokenizerError> {
        let pipeline = self.pipeline()?;
        if inputs.is_empty() {
            return Err(TokenizerError::EmptyBatch);
        }
        let params = params.unwrap_or(&self.encode_params);
        let truncation = self.truncation.as_ref();

        let mut encoded = inputs
            .par_iter()
            .map(|&input| pipeline.encode_input(input.into(), params, truncation))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(padding) = &self.padding {
            pad_encodings(&mut encoded, padding)?;
        }

        Ok(encoded
            .into_iter()
            .map(|encoded| encoded.into_encoding(params))
            .collect())
    }

    /// Decode a sequence of token IDs to a text string.
    ///
    /// If `skip_special_tokens` is true, special added tokens and tokens
    /// inserted by the post-processor are omitted. IDs that are not in the
    /// vocabulary decode as the unknown token. Fails if there is no unknown
    /// token.
    pub fn decode(
        &self,
        ids: &[TokenId],
        skip_special_tokens: bool,
    ) -> Result<String, TokenizerError> {
        let pipeline = self.pipeline()?;
        let special_ids = if skip_special_tokens {
            pipeline.special_ids()
        } else {
            HashSet::new()
        };

        let tokens = ids
            .iter()
            .filter(|id| !special_ids.contains(id))
            .map(|&id| pipeline.id_to_token(id))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match &pipeline.decoder {
            Some(decoder) => decoder.decode(&tokens),
            None => join_with_spaces(&tokens),
        })
    }

    /// Return the number of distinct token IDs, including added tokens that
    /// are not in the model's vocabulary.
    pub fn vocab_size(&self) -> Result<usize, TokenizerError> {
        let pipeline = self.pipeline()?;
        let vocab = pipeline.model.vocab();
        let extra = pipeline
            .added_tokens
            .iter()
            .filter(|token| vocab.id_to_token(token.id).is_none())
            .count();
        Ok(vocab.len() + extra)
    }

    /// Return the ID of a token given its canonical string representation.
    ///
    /// This is usually used for looking up the IDs of special/added tokens.
    pub fn token_to_id(&self, token: &str) -> Result<TokenId, TokenizerError> {
        let pipeline = self.pipeline()?;
        pipeline
            .added_tokens
            .token_to_id(token)
            .or_else(|| pipeline.model.token_to_id(token))
            .ok_or_else(|| TokenizerError::TokenNotFound(token.to_string()))
    }

    /// Return the canonical string representation of a token ID.
    pub fn id_to_token(&self, id: TokenId) -> Result<&str, TokenizerError> {
        let pipeline = self.pipeline()?;
        pipeline
            .added_tokens
            .id_to_token(id)
            .or_else(|| pipeline.model.id_to_token(id))
            .ok_or(TokenizerError::Decode(DecodeError::InvalidTokenId(id)))
    }

    /// Release the tokenizer's pipeline.
    ///
    /// The pipeline is freed once no clones of this tokenizer use it. Any
    /// later call on this instance, including another `release`, fails with
    /// [`TokenizerError::Released`].
    pub fn release(&mut self) -> Result<(), TokenizerError> {
        match self.pipeline.take() {
            Some(_) => {
                debug!("released tokenizer");
                Ok(())
            }
            None => Err(TokenizerError::Released),
        }
    }

    /// Return true if [`release`](Tokenizer::release) has been called.
    pub fn is_released(&self) -> bool {
        self.pipeline.is_none()
    }
}

fn build_normalizer(normalizer: json::Normalizer) -> Result<Box<dyn Normalizer>, LoadError> {
    let normalizer: Box<dyn Normalizer> = match normalizer {
        json::Normalizer::Bert(bert) => Box::new(normalizers::Bert::new(normalizers::BertOptions {
            clean_text: bert.clean_text,
            handle_chinese_chars: bert.handle_chinese_chars,
            strip_accents: bert.strip_accents.unwrap_or(bert.lowercase),
            lowercase: bert.lowercase,
        })),
        json::Normalizer::Lowercase => Box::new(normalizers::Lowercase),
        json::Normalizer::StripAccents => Box::new(normalizers::StripAccents),
        json::Normalizer::Strip(strip) => Box::new(normalizers::Strip {
            left: strip.strip_left,
            right: strip.strip_right,
        }),
        json::Normalizer::Nfc => Box::new(normalizers::Unicode::Nfc),
        json::Normalizer::Nfd => Box::new(normalizers::Unicode::Nfd),
        json::Normalizer::Nfkc => Box::new(normalizers::Unicode::Nfkc),
        json::Normalizer::Nfkd => Box::new(normalizers::Unicode::Nfkd),
        json::Normalizer::Sequence { normalizers } => {
            let normalizers = normalizers
                .into_iter()
                .map(|n| build_normalizer(n.into_known("normalizer")?))
                .collect::<Result<Vec<_>, _>>()?;
            Box::new(normalizers::Sequence::from_vec(normalizers))
        }
    };
    Ok(normalizer)
}

fn build_pre_tokenizer(
    pre_tokenizer: json::PreTokenizer,
) -> Result<Box<dyn PreTokenizer>, LoadError> {
    let pre_tokenizer: Box<dyn PreTokenizer> = match pre_tokenizer {
        json::PreTokenizer::Bert => Box::new(pre_tokenizers::Bert::new()),
        json::PreTokenizer::ByteLevel(byte_level) => Box::new(pre_tokenizers::ByteLevel::new(
            byte_level.add_prefix_space,
            byte_level.use_regex,
        )),
        json::PreTokenizer::Whitespace => Box::new(pre_tokenizers::Whitespace::new()),
        json::PreTokenizer::WhitespaceSplit => Box::new(pre_tokenizers::WhitespaceSplit),
        json::PreTokenizer::Punctuation { behavior } => {
            Box::new(pre_tokenizers::Punctuation::new(behavior))
        }
        json::PreTokenizer::Digits { individual_digits } => {
            Box::new(pre_tokenizers::Digits::new(individual_digits))
        }
        json::PreTokenizer::Split(split) => {
            let pattern = match split.pattern {
                json::Pattern::String(s) => SplitPattern::String(s),
                json::Pattern::Regex(re) => SplitPattern::Regex(re),
            };
            Box::new(pre_tokenizers::Split::new(SplitOptions {
                pattern,
                behavior: split.behavior,
                invert: split.invert,
            })?)
        }
        json::PreTokenizer::Sequence { pretokenizers } => {
            let pre_tokenizers = pretokenizers
                .into_iter()
                .map(|pt| build_pre_tokenizer(pt.into_known("pre-tokenizer")?))
                .collect::<Result<Vec<_>, _>>()?;
            Box::new(pre_tokenizers::Sequence::from_vec(pre_tokenizers))
        }
    };
    Ok(pre_tokenizer)
}

fn build_template(template: json::Template) -> Result<Template, PostProcessError> {
    match template {
        json::Template::String(template) => Template::parse(&template),
        json::Template::Pieces(pieces) => Ok(Template::new(
            pieces
                .into_iter()
                .map(|piece| match piece {
                    json::Piece::Sequence { id, type_id } => Piece::Sequence {
                        id: match id {
                            json::Sequence::A => post_processors::Sequence::A,
                            json::Sequence::B => post_processors::Sequence::B,
                        },
                        type_id,
                    },
                    json::Piece::SpecialToken { id, type_id } => {
                        Piece::SpecialToken { id, type_id }
                    }
                })
                .collect(),
        )),
    }
}

fn build_post_processor(
    post_processor: json::PostProcessor,
) -> Result<Box<dyn PostProcessor>, LoadError> {
    let post_processor: Box<dyn PostProcessor> = match post_processor {
        json::PostProcessor::BertProcessing { cls, sep } => {
            Box::new(post_processors::Bert::new(cls, sep))
        }
        json::PostProcessor::RobertaProcessing {
            cls,
            sep,
            trim_offsets,
        } => {
            if trim_offsets {
                warn!("RobertaProcessing trim_offsets is not supported and will be ignored");
            }
            Box::new(post_processors::Roberta::new(cls, sep))
        }
        json::PostProcessor::TemplateProcessing {
            single,
            pair,
            special_tokens,
        } => {
            let special_tokens = special_tokens
                .into_values()
                .map(|token| SpecialToken {
                    id: token.id,
                    ids: token.ids,
                    tokens: token.tokens,
                })
                .collect();
            Box::new(TemplateProcessing::new(
                build_template(single)?,
                build_template(pair)?,
                special_tokens,
            )?)
        }
        json::PostProcessor::ByteLevel { trim_offsets } => {
            if trim_offsets {
                warn!("ByteLevel trim_offsets is not supported and will be ignored");
            }
            Box::new(post_processors::ByteLevel::new())
        }
    };
    Ok(post_processor)
}

fn build_decoder(decoder: json::Decoder) -> Box<dyn Decoder> {
    match decoder {
        json::Decoder::WordPiece { prefix, cleanup } => {
            Box::new(decoders::WordPiece::new(prefix, cleanup))
        }
        json::Decoder::ByteLevel => Box::new(decoders::ByteLevel::new()),
        json::Decoder::Bpe { suffix } => Box::new(decoders::Bpe::new(suffix)),
    }
}
