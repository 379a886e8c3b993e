use crate::config::UNICODE_WORDS_ENCODING;
use crate::error::{ChunkerError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;
use unicode_segmentation::UnicodeSegmentation;

/// Byte range of the source text covered by one or more tokens.
///
/// `tokens` is how many encoder tokens map onto the range. Byte-level encoders can emit several
/// tokens for a single character; those share one span since the text cannot be cut between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
    pub tokens: usize,
}

impl TokenSpan {
    /// A span holding exactly one token
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self::with_tokens(start, end, 1)
    }

    #[must_use]
    pub const fn with_tokens(start: usize, end: usize, tokens: usize) -> Self {
        Self { start, end, tokens }
    }
}

/// A tokenization scheme that reports where each token sits in the source text.
///
/// Spans are returned in source order, non-empty and non-overlapping. Summing `tokens` over all
/// spans gives the token count of the text.
pub trait TokenEncoding: Send + Sync {
    fn name(&self) -> &str;

    fn encode(&self, text: &str) -> Result<Vec<TokenSpan>>;
}

/// Word-level encoding on Unicode word boundaries.
///
/// Every boundary segment holding at least one non-whitespace character counts as a token, so
/// punctuation marks are tokens of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnicodeWords;

impl TokenEncoding for UnicodeWords {
    fn name(&self) -> &str {
        UNICODE_WORDS_ENCODING
    }

    fn encode(&self, text: &str) -> Result<Vec<TokenSpan>> {
        Ok(text
            .split_word_bound_indices()
            .filter(|(_, segment)| segment.chars().any(|c| !c.is_whitespace()))
            .map(|(start, segment)| TokenSpan::new(start, start + segment.len()))
            .collect())
    }
}

/// Encoding backed by a HuggingFace `tokenizer.json`
pub struct HfTokenizerEncoding {
    name: String,
    tokenizer: Tokenizer,
}

impl HfTokenizerEncoding {
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let name = name.into();
        let mut tokenizer = Tokenizer::from_file(path)
            .map_err(|e| ChunkerError::encoding_unavailable(&name, format!("{e}")))?;
        // Counting must see the whole text; a truncating tokenizer would hide tokens.
        tokenizer
            .with_truncation(None)
            .map_err(|e| ChunkerError::encoding_unavailable(&name, format!("{e}")))?;
        tokenizer.with_padding(None);
        Ok(Self { name, tokenizer })
    }
}

impl TokenEncoding for HfTokenizerEncoding {
    fn name(&self) -> &str {
        &self.name
    }

    fn encode(&self, text: &str) -> Result<Vec<TokenSpan>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| ChunkerError::tokenization(format!("{e}")))?;

        let mut spans: Vec<TokenSpan> = Vec::with_capacity(encoding.len());
        for &(start, end) in encoding.get_offsets() {
            if start >= end || end > text.len() {
                continue;
            }
            match spans.last_mut() {
                // Byte-level BPE can map several tokens onto one character; fold them together.
                Some(last) if start < last.end => {
                    last.end = last.end.max(end);
                    last.tokens += 1;
                }
                _ => spans.push(TokenSpan::new(start, end)),
            }
        }
        Ok(spans)
    }
}

/// Resolve an encoding by name.
///
/// `unicode-words` is built in. Any other name is looked up as a `tokenizer.json`: first as a
/// literal path, then as `<tokenizer_dir>/<name>/tokenizer.json`.
pub fn resolve_encoding(
    name: &str,
    tokenizer_dir: Option<&Path>,
) -> Result<Arc<dyn TokenEncoding>> {
    let name = name.trim();
    if name.eq_ignore_ascii_case(UNICODE_WORDS_ENCODING) {
        return Ok(Arc::new(UnicodeWords));
    }

    let candidates = tokenizer_candidates(name, tokenizer_dir);
    let Some(path) = candidates.iter().find(|p| p.is_file()) else {
        let tried = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ChunkerError::encoding_unavailable(
            name,
            format!("no tokenizer.json found (tried: {tried})"),
        ));
    };

    log::debug!("Loading tokenizer for encoding '{name}' from {}", path.display());
    Ok(Arc::new(HfTokenizerEncoding::from_file(name, path)?))
}

fn tokenizer_candidates(name: &str, tokenizer_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(name)];
    if let Some(dir) = tokenizer_dir {
        candidates.push(dir.join(name).join("tokenizer.json"));
    }
    candidates
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::{Path, PathBuf};
    use tokenizers::pre_tokenizers::byte_level::ByteLevel;
    use tokenizers::Tokenizer;

    /// Write a byte-level BPE tokenizer to `<dir>/<name>/tokenizer.json`.
    ///
    /// The vocabulary is the 256 byte symbols plus `th` and `the`: ASCII words mix merged and
    /// single-byte tokens, and every CJK character encodes as three tokens.
    pub(crate) fn write_byte_level_tokenizer(dir: &Path, name: &str) -> PathBuf {
        let mut alphabet: Vec<char> = ByteLevel::alphabet().into_iter().collect();
        alphabet.sort_unstable();

        let mut vocab = serde_json::Map::new();
        for (id, symbol) in alphabet.iter().enumerate() {
            vocab.insert(symbol.to_string(), id.into());
        }
        vocab.insert("th".to_string(), alphabet.len().into());
        vocab.insert("the".to_string(), (alphabet.len() + 1).into());

        let byte_level = serde_json::json!({
            "type": "ByteLevel",
            "add_prefix_space": false,
            "trim_offsets": false,
            "use_regex": true
        });
        let tokenizer = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": byte_level,
            "post_processor": null,
            "decoder": byte_level,
            "model": {
                "type": "BPE",
                "dropout": null,
                "unk_token": null,
                "continuing_subword_prefix": null,
                "end_of_word_suffix": null,
                "fuse_unk": false,
                "byte_fallback": false,
                "vocab": vocab,
                "merges": ["t h", "th e"]
            }
        });

        let model_dir = dir.join(name);
        std::fs::create_dir_all(&model_dir).unwrap();
        let path = model_dir.join("tokenizer.json");
        std::fs::write(&path, tokenizer.to_string()).unwrap();
        path
    }

    /// Token count straight from the tokenizer, without span folding
    pub(crate) fn raw_token_count(path: &Path, text: &str) -> usize {
        Tokenizer::from_file(path)
            .unwrap()
            .encode(text, false)
            .unwrap()
            .len()
    }
}
