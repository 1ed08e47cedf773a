use std::collections::HashMap;
use std::ops::Range;

use super::Model;
use crate::decoders::{self, Decoder};
use crate::vocab::{TokenId, Vocab, VocabError};

/// Errors that can occur when building a [`Bpe`] tokenizer.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum BpeError {
    /// There was an invalid entry in the merge list. This means that either
    /// one of the parts, or their concatenation, is not in the vocabulary.
    #[error("invalid merge entry: {0}")]
    InvalidMergeEntry(String),

    /// A token required by the model is missing from the vocabulary.
    #[error(transparent)]
    Vocab(#[from] VocabError),
}

/// Rank of a pair in the merge list. Lower ranks are merged first.
type Rank = u32;

/// Return true if `c` is considered a printable character.
///
/// This matches the output of Python's `str.isprintable` for code points < 256,
/// except for ASCII space.
fn is_printable(c: char) -> bool {
    !c.is_control() && !c.is_whitespace() && c != '\u{ad}' /* soft hyphen */
}

/// Return the printable character which represents each byte value in the
/// vocabularies of byte-level BPE models.
///
/// Based on the `bytes_to_unicode` function in the original GPT-2 encoder -
/// <https://github.com/openai/gpt-2/blob/master/src/encoder.py>.
pub fn byte_to_char() -> [char; 256] {
    let mut chars = ['\0'; 256];
    let mut n = 0;
    for b in 0..=255u8 {
        let ch = char::from(b);
        chars[b as usize] = if is_printable(ch) {
            ch
        } else {
            let mapped = char::from_u32(256 + n).unwrap_or(ch);
            n += 1;
            mapped
        };
    }
    chars
}

/// Return a mapping between the printable characters used in the vocabularies
/// of byte-level BPE models, and the byte values they represent.
pub fn char_to_byte() -> HashMap<char, u8> {
    byte_to_char()
        .into_iter()
        .enumerate()
        .map(|(b, ch)| (ch, b as u8))
        .collect()
}

/// Parse a list of space-separated BPE merge entries into pairs of tokens.
///
/// Lines that are empty or contain only a `#version` marker are ignored.
pub fn merge_pairs_from_lines(lines: &[impl AsRef<str>]) -> Vec<(&str, &str)> {
    lines
        .iter()
        .filter_map(|line| {
            let line = line.as_ref();
            if line.starts_with("#version") || line.trim().is_empty() {
                None
            } else {
                line.split_once(' ')
            }
        })
        .collect()
}

/// Configuration for a [`Bpe`] tokenization model.
#[derive(Clone, Debug, Default)]
pub struct BpeOptions<'a> {
    /// Ordered entries of the merge list. See also [`merge_pairs_from_lines`]
    /// which can be used to extract pairs from the space-separated format
    /// used in eg. `merges.txt` files.
    pub merges: &'a [(&'a str, &'a str)],

    /// Mapping between token strings and IDs.
    pub vocab: HashMap<String, TokenId>,

    /// Token emitted for chars that are not in the vocabulary. If `None`,
    /// such chars are dropped.
    pub unk_token: Option<String>,

    /// Prefix attached to every piece of a word except the first.
    pub continuing_subword_prefix: Option<String>,

    /// A string which is implicitly appended to each word that is tokenized,
    /// after initial splitting.
    pub end_of_word_suffix: Option<String>,

    /// Merge consecutive unknown tokens into one.
    pub fuse_unk: bool,

    /// Represent chars that are not in the vocabulary using `<0xXX>` byte
    /// tokens instead of the unknown token.
    pub byte_fallback: bool,

    /// Emit words that are in the vocabulary as a single token, without
    /// applying merges.
    pub ignore_merges: bool,

    /// Operate on bytes represented by the printable chars of
    /// [`byte_to_char`], as GPT-2 does, rather than on chars.
    pub byte_level: bool,
}

/// One piece of a word during merging.
#[derive(Clone, Debug)]
struct Symbol {
    id: TokenId,
    range: Range<usize>,
}

/// Byte Pair Encoding tokenizer used by GPT-2 [^1] and subsequently used by
/// many other models.
///
/// Byte Pair Encoding was introduced by [^2]. Despite the name, the original
/// version operated on characters. The variant used by GPT-2 and other OpenAI
/// models operates on bytes instead. This avoids needing a huge base vocabulary
/// to support Unicode. Both variants are supported, see
/// [`BpeOptions::byte_level`].
///
/// [^1]: Radford, Alec, et al. (2019) "Language models are unsupervised multitask learners."
///       <https://openai.com/research/better-language-models>
///
/// [^2]: Sennrich, Rico, Barry Haddow, and Alexandra Birch. "Neural machine
///       translation of rare words with subword units." arXiv preprint
///       arXiv:1508.07909 (2015).
#[derive(Clone, Debug)]
pub struct Bpe {
    vocab: Vocab,

    /// Map from pairs of token IDs to the rank of the pair in the merge list
    /// and the ID of the merged token.
    merges: HashMap<(TokenId, TokenId), (Rank, TokenId)>,

    continuing_subword_prefix: Option<String>,

    /// A suffix which is implicitly appended to each string piece to be
    /// tokenized.
    ///
    /// This was originally introduced for CLIP's tokenizer.
    /// See <https://github.com/openai/CLIP/blob/main/clip/simple_tokenizer.py>.
    end_of_word_suffix: Option<String>,

    fuse_unk: bool,
    byte_fallback: bool,
    ignore_merges: bool,

    /// Printable char for each byte value, if this is a byte-level model.
    byte_to_char: Option<[char; 256]>,
}

impl Bpe {
    /// Create a new Byte Pair Encoding tokenizer using the given configuration.
    pub fn new(config: BpeOptions) -> Result<Bpe, BpeError> {
        let BpeOptions {
            merges,
            vocab,
            unk_token,
            mut continuing_subword_prefix,
            mut end_of_word_suffix,
            fuse_unk,
            byte_fallback,
            ignore_merges,
            byte_level,
        } = config;

        // Normalize empty affixes to `None`. Some tokenizer.json files
        // represent these using `""` instead of `null`.
        continuing_subword_prefix.take_if(|prefix| prefix.is_empty());
        end_of_word_suffix.take_if(|suffix| suffix.is_empty());

        let mut vocab = Vocab::new(vocab);
        if let Some(unk) = unk_token.as_deref() {
            vocab = vocab.with_unknown_token(unk)?;
        }

        let prefix_len = continuing_subword_prefix.as_ref().map_or(0, |p| p.len());
        let mut merge_ranks = HashMap::with_capacity(merges.len());
        for (rank, &(a, b)) in merges.iter().enumerate() {
            let invalid_entry = || BpeError::InvalidMergeEntry(format!("{} {}", a, b));
            let a_id = vocab.token_to_id(a).ok_or_else(invalid_entry)?;
            let b_id = vocab.token_to_id(b).ok_or_else(invalid_entry)?;

            // The second part of a pair carries the continuation prefix, which
            // the merged token only has at its start.
            let b_body = if prefix_len > 0
                && continuing_subword_prefix
                    .as_deref()
                    .is_some_and(|p| b.starts_with(p))
            {
                &b[prefix_len..]
            } else {
                b
            };
            let merged = [a, b_body].concat();
            let merged_id = vocab.token_to_id(&merged).ok_or_else(invalid_entry)?;

            merge_ranks
                .entry((a_id, b_id))
                .or_insert((rank as Rank, merged_id));
        }

        Ok(Bpe {
            vocab,
            merges: merge_ranks,
            continuing_subword_prefix,
            end_of_word_suffix,
            fuse_unk,
            byte_fallback,
            ignore_merges,
            byte_to_char: byte_level.then(byte_to_char),
        })
    }

    /// Return true if this model operates on bytes rather than chars.
    pub fn is_byte_level(&self) -> bool {
        self.byte_to_char.is_some()
    }

    /// Split `word` into the initial units which are merged. These are bytes
    /// for byte-level models or chars otherwise.
    ///
    /// Returns `(text, byte_range)` pairs where `text` is the unit as it
    /// appears in the vocabulary.
    fn units(&self, word: &str) -> Vec<(String, Range<usize>)> {
        match &self.byte_to_char {
            Some(byte_to_char) => word
                .bytes()
                .enumerate()
                .map(|(i, b)| (byte_to_char[b as usize].to_string(), i..i + 1))
                .collect(),
            None => word
                .char_indices()
                .map(|(i, ch)| (ch.to_string(), i..i + ch.len_utf8()))
                .collect(),
        }
    }

    /// Map a word to its representation in the vocabulary.
    fn vocab_text(&self, word: &str) -> String {
        match &self.byte_to_char {
            Some(byte_to_char) => word.bytes().map(|b| byte_to_char[b as usize]).collect(),
            None => word.to_string(),
        }
    }

    /// Create the initial symbols for `word`, one per unit, before merging.
    fn initial_symbols(&self, word: &str) -> Vec<Symbol> {
        let units = self.units(word);
        let n_units = units.len();
        let mut symbols: Vec<Symbol> = Vec::with_capacity(n_units);
        let mut prev_unknown = false;
        let mut token = String::new();

        for (i, (unit, range)) in units.into_iter().enumerate() {
            token.clear();
            if i > 0 {
                if let Some(prefix) = &self.continuing_subword_prefix {
                    token.push_str(prefix);
                }
            }
            token.push_str(&unit);
            if i == n_units - 1 {
                if let Some(suffix) = &self.end_of_word_suffix {
                    token.push_str(suffix);
                }
            }

            if let Some(id) = self.vocab.token_to_id(&token) {
                symbols.push(Symbol { id, range });
                prev_unknown = false;
                continue;
            }

            if self.byte_fallback {
                let byte_ids: Option<Vec<TokenId>> = word.as_bytes()[range.clone()]
                    .iter()
                    .map(|b| self.vocab.token_to_id(&format!("<0x{:02X}>", b)))
                    .collect();
                if let Some(byte_ids) = byte_ids {
                    symbols.extend(byte_ids.into_iter().enumerate().map(|(j, id)| Symbol {
                        id,
                        range: range.start + j..range.start + j + 1,
                    }));
                    prev_unknown = false;
                    continue;
                }
            }

            let Some(unknown_id) = self.vocab.unknown_id() else {
                continue;
            };
            match symbols.last_mut() {
                Some(last) if self.fuse_unk && prev_unknown => last.range.end = range.end,
                _ => symbols.push(Symbol {
                    id: unknown_id,
                    range,
                }),
            }
            prev_unknown = true;
        }

        symbols
    }

    /// Iteratively merge pairs of symbols, lowest rank first, until no more
    /// merges are possible.
    fn merge(&self, symbols: &mut Vec<Symbol>) {
        loop {
            let min_pair = symbols
                .windows(2)
                .filter_map(|pair| {
                    self.merges
                        .get(&(pair[0].id, pair[1].id))
                        .map(|&(rank, merged_id)| ((pair[0].id, pair[1].id), rank, merged_id))
                })
                .min_by_key(|(_, rank, _)| *rank);

            let Some(((first, second), _rank, merged_id)) = min_pair else {
                break;
            };

            let mut i = 0;
            while i + 1 < symbols.len() {
                if symbols[i].id == first && symbols[i + 1].id == second {
                    let end = symbols[i + 1].range.end;
                    symbols[i].id = merged_id;
                    symbols[i].range.end = end;
                    symbols.remove(i + 1);
                }
                i += 1;
            }
        }
    }
}

impl Model for Bpe {
    fn encode_with_offsets(&self, word: &str, on_token: &mut dyn FnMut(Range<usize>, TokenId)) {
        if word.is_empty() {
            return;
        }

        if self.ignore_merges {
            if let Some(id) = self.vocab.token_to_id(&self.vocab_text(word)) {
                on_token(0..word.len(), id);
                return;
            }
        }

        let mut symbols = self.initial_symbols(word);
        self.merge(&mut symbols);
        for Symbol { id, range } in symbols {
            on_token(range, id);
        }
    }

    fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    fn default_decoder(&self) -> Option<Box<dyn Decoder>> {
        if self.is_byte_level() {
            Some(Box::new(decoders::ByteLevel::new()))
        } else {
            self.end_of_word_suffix
                .as_ref()
                .map(|suffix| Box::new(decoders::Bpe::new(suffix.clone())) as Box<dyn Decoder>)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokenflow_testing::{vocab_from_tokens, TestCases};

    use super::{byte_to_char, char_to_byte, merge_pairs_from_lines, Bpe, BpeError, BpeOptions};
    use crate::models::Model;
    use crate::pre_tokenizers::{PreTokenizer, Split};

    // The first ~25 lines of the merge list from GPT 2.
    const MINI_GPT2: &str = "
#version: 0.2
Ġ t
Ġ a
h e
i n
r e
o n
Ġt he
e r
Ġ s
a t
Ġ w
Ġ o
e n
Ġ c
i t
i s
a n
o r
e s
Ġ b
e d
Ġ f
in g";

    /// Generate a byte-level vocabulary containing every single-byte token
    /// and the token formed by each merge entry.
    fn byte_level_vocab(merges: &[(&str, &str)]) -> HashMap<String, u32> {
        let mut tokens: Vec<String> = byte_to_char().iter().map(|ch| ch.to_string()).collect();
        tokens.extend(merges.iter().map(|(a, b)| [*a, *b].concat()));
        tokens
            .into_iter()
            .enumerate()
            .map(|(i, tok)| (tok, i as u32))
            .collect()
    }

    /// Split `text` with the GPT-2 regex and encode each piece.
    fn tokenize(model: &Bpe, text: &str) -> Vec<String> {
        let words = Split::gpt2().pre_tokenize(text).unwrap();
        words
            .into_iter()
            .flat_map(|word| model.encode(word))
            .map(|(_, id)| model.id_to_token(id).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_byte_char_mapping() {
        let byte_to_char = byte_to_char();
        assert_eq!(byte_to_char[b'a' as usize], 'a');
        assert_eq!(byte_to_char[b' ' as usize], 'Ġ');
        assert_eq!(byte_to_char[b'\n' as usize], 'Ċ');

        let char_to_byte = char_to_byte();
        assert_eq!(char_to_byte.len(), 256);
        assert_eq!(char_to_byte[&'Ġ'], b' ');
    }

    #[test]
    fn test_encode_byte_level() {
        #[derive(Debug)]
        struct Case<'a> {
            text: &'a str,
            expected_tokens: &'a [&'a str],
            merges: &'a str,
        }

        let cases = [
            // Minimal test using a snippet of the GPT-2 merge list.
            Case {
                text: "the cat is in the bed",
                expected_tokens: &[
                    "t", "he", "Ġc", "at", "Ġ", "is", "Ġ", "in", "Ġthe", "Ġb", "ed",
                ],
                merges: MINI_GPT2,
            },
            // Test several levels of merging.
            Case {
                text: "--------",
                expected_tokens: &["--------"],
                merges: "
- -
-- --
---- ----
",
            },
            // Non-ASCII text is split into bytes.
            Case {
                text: "né",
                expected_tokens: &["n", "Ã", "©"],
                merges: "",
            },
        ];

        cases.test_each(|case| {
            let lines: Vec<&str> = case.merges.lines().collect();
            let merges = merge_pairs_from_lines(&lines);
            let model = Bpe::new(BpeOptions {
                merges: &merges,
                vocab: byte_level_vocab(&merges),
                byte_level: true,
                ..Default::default()
            })
            .unwrap();
            assert_eq!(tokenize(&model, case.text), case.expected_tokens);
        })
    }

    #[test]
    fn test_byte_level_offsets() {
        let model = Bpe::new(BpeOptions {
            vocab: byte_level_vocab(&[]),
            byte_level: true,
            ..Default::default()
        })
        .unwrap();
        let ranges: Vec<_> = model.encode("né").into_iter().map(|(r, _)| r).collect();
        assert_eq!(ranges, [0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_encode_char_level() {
        #[derive(Debug)]
        struct Case<'a> {
            word: &'a str,
            expected_tokens: &'a [&'a str],
            vocab: &'a [&'a str],
            merges: &'a [(&'a str, &'a str)],
            opts: BpeOptions<'a>,
        }

        let cases = [
            // End-of-word suffix
            Case {
                word: "barbar",
                expected_tokens: &["bar", "bar</w>"],
                vocab: &["b", "a", "r", "r</w>", "ba", "bar", "bar</w>"],
                merges: &[("b", "a"), ("ba", "r"), ("ba", "r</w>")],
                opts: BpeOptions {
                    end_of_word_suffix: Some("</w>".to_string()),
                    ..Default::default()
                },
            },
            // Empty end-of-word suffix is treated as `None`.
            Case {
                word: "barbar",
                expected_tokens: &["bar", "bar"],
                vocab: &["b", "a", "r", "ba", "bar"],
                merges: &[("b", "a"), ("ba", "r")],
                opts: BpeOptions {
                    end_of_word_suffix: Some(String::new()),
                    ..Default::default()
                },
            },
            // Continuing sub-word prefix
            Case {
                word: "hello",
                expected_tokens: &["he", "##llo"],
                vocab: &["h", "##e", "##l", "##o", "he", "##ll", "##llo"],
                merges: &[("h", "##e"), ("##l", "##l"), ("##ll", "##o")],
                opts: BpeOptions {
                    continuing_subword_prefix: Some("##".to_string()),
                    ..Default::default()
                },
            },
            // Unknown chars, fused.
            Case {
                word: "axyb",
                expected_tokens: &["a", "<unk>", "b"],
                vocab: &["<unk>", "a", "b"],
                merges: &[],
                opts: BpeOptions {
                    unk_token: Some("<unk>".to_string()),
                    fuse_unk: true,
                    ..Default::default()
                },
            },
            // Unknown chars, not fused.
            Case {
                word: "axyb",
                expected_tokens: &["a", "<unk>", "<unk>", "b"],
                vocab: &["<unk>", "a", "b"],
                merges: &[],
                opts: BpeOptions {
                    unk_token: Some("<unk>".to_string()),
                    ..Default::default()
                },
            },
            // Unknown chars without an unknown token are dropped.
            Case {
                word: "axb",
                expected_tokens: &["a", "b"],
                vocab: &["a", "b"],
                merges: &[],
                opts: BpeOptions::default(),
            },
            // Byte fallback
            Case {
                word: "aé",
                expected_tokens: &["a", "<0xC3>", "<0xA9>"],
                vocab: &["<unk>", "a", "<0xC3>", "<0xA9>"],
                merges: &[],
                opts: BpeOptions {
                    unk_token: Some("<unk>".to_string()),
                    byte_fallback: true,
                    ..Default::default()
                },
            },
            // Whole words in the vocabulary skip merging.
            Case {
                word: "abc",
                expected_tokens: &["abc"],
                vocab: &["a", "b", "c", "ab", "abc"],
                merges: &[("a", "b")],
                opts: BpeOptions {
                    ignore_merges: true,
                    ..Default::default()
                },
            },
            Case {
                word: "abc",
                expected_tokens: &["ab", "c"],
                vocab: &["a", "b", "c", "ab", "abc"],
                merges: &[("a", "b")],
                opts: BpeOptions::default(),
            },
        ];

        cases.test_each(|case| {
            let model = Bpe::new(BpeOptions {
                merges: case.merges,
                vocab: vocab_from_tokens(case.vocab),
                ..case.opts.clone()
            })
            .unwrap();
            let tokens: Vec<_> = model
                .encode(case.word)
                .into_iter()
                .map(|(_, id)| model.id_to_token(id).unwrap().to_string())
                .collect();
            assert_eq!(tokens, case.expected_tokens);
        })
    }

    #[test]
    fn test_fused_unknown_offsets() {
        let model = Bpe::new(BpeOptions {
            vocab: vocab_from_tokens(&["<unk>", "a"]),
            unk_token: Some("<unk>".to_string()),
            fuse_unk: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(model.encode("axyz"), [(0..1, 1), (1..4, 0)]);
    }

    #[test]
    fn test_invalid_merges() {
        let merges = [("a", "q")];
        let err = Bpe::new(BpeOptions {
            merges: &merges,
            vocab: vocab_from_tokens(&["a", "b"]),
            ..Default::default()
        })
        .err();
        assert_eq!(err, Some(BpeError::InvalidMergeEntry("a q".to_string())));

        let err = Bpe::new(BpeOptions {
            vocab: vocab_from_tokens(&["a"]),
            unk_token: Some("<unk>".to_string()),
            ..Default::default()
        })
        .err();
        assert!(matches!(err, Some(BpeError::Vocab(_))));
    }
}
