use crate::config::ChunkerConfig;
use crate::encoding::{TokenEncoding, UnicodeWords};
use crate::error::Result;
use crate::strategy::SplitPlanner;
use crate::types::{ChunkMetadata, TextChunk};
use std::sync::Arc;

/// Main chunker interface for splitting record text
///
/// A chunker either owns a token encoding (the splitter is available) or runs in fallback mode,
/// where every text becomes a single chunk. Which of the two applies is decided once, when the
/// chunker is built.
#[derive(Clone)]
pub struct TextChunker {
    config: ChunkerConfig,
    encoding: Option<Arc<dyn TokenEncoding>>,
}

impl TextChunker {
    /// Create a chunker that splits with the given encoding
    pub fn new(config: ChunkerConfig, encoding: Arc<dyn TokenEncoding>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            encoding: Some(encoding),
        })
    }

    /// Create a chunker using the built-in word-level encoding
    pub fn with_unicode_words(config: ChunkerConfig) -> Result<Self> {
        Self::new(config, Arc::new(UnicodeWords))
    }

    /// Create a chunker without a splitter: every text becomes one chunk
    pub fn fallback(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            encoding: None,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    #[must_use]
    pub const fn splitter_available(&self) -> bool {
        self.encoding.is_some()
    }

    /// Name of the encoding in use, if any
    #[must_use]
    pub fn encoding_name(&self) -> Option<&str> {
        self.encoding.as_deref().map(|encoding| encoding.name())
    }

    /// Split `text` into ordered chunks.
    ///
    /// Never fails and always returns at least one chunk. Each chunk carries `parent_seq` and a
    /// copy of `metadata`.
    #[must_use]
    pub fn chunk(&self, parent_seq: u64, text: &str, metadata: &ChunkMetadata) -> Vec<TextChunk> {
        let Some(encoding) = self.encoding.as_deref() else {
            return vec![Self::whole_text_chunk(parent_seq, text, metadata)];
        };

        let spans = match encoding.encode(text) {
            Ok(spans) => spans,
            Err(e) => {
                log::warn!(
                    "Splitter '{}' failed for record {parent_seq}, keeping the body as one chunk: {e}",
                    encoding.name()
                );
                return vec![Self::whole_text_chunk(parent_seq, text, metadata)];
            }
        };

        if spans.is_empty() {
            return vec![TextChunk::new(
                parent_seq,
                0,
                String::new(),
                0,
                metadata.clone(),
            )];
        }

        let planner = SplitPlanner::new(
            text,
            &spans,
            self.config.min_tokens,
            self.config.max_tokens,
        );
        let chunks: Vec<TextChunk> = planner
            .plan()
            .iter()
            .enumerate()
            .map(|(position, tokens)| {
                let bytes = planner.byte_range(tokens);
                TextChunk::new(
                    parent_seq,
                    position,
                    text[bytes].to_string(),
                    planner.token_count(tokens),
                    metadata.clone(),
                )
            })
            .collect();

        log::debug!(
            "Record {parent_seq}: {} tokens -> {} chunk(s)",
            planner.total_tokens(),
            chunks.len()
        );
        chunks
    }

    fn whole_text_chunk(parent_seq: u64, text: &str, metadata: &ChunkMetadata) -> TextChunk {
        TextChunk::new(
            parent_seq,
            0,
            text.to_string(),
            TextChunk::estimate_tokens_from_content(text),
            metadata.clone(),
        )
    }
}

impl std::fmt::Debug for TextChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextChunker")
            .field("config", &self.config)
            .field("encoding", &self.encoding_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{fixtures, resolve_encoding, TokenSpan};
    use crate::error::ChunkerError;
    use pretty_assertions::assert_eq;

    struct FailingEncoding;

    impl TokenEncoding for FailingEncoding {
        fn name(&self) -> &str {
            "failing"
        }

        fn encode(&self, _text: &str) -> Result<Vec<TokenSpan>> {
            Err(ChunkerError::tokenization("backend exploded"))
        }
    }

    fn headline(value: &str) -> ChunkMetadata {
        ChunkMetadata::from([("headline".to_string(), value.to_string())])
    }

    fn strip_whitespace(text: &str) -> String {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = TextChunker::with_unicode_words(ChunkerConfig::with_bounds(50, 400)).unwrap();
        let chunks = chunker.chunk(7, "short text", &headline("A"));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "short text");
        assert_eq!(chunks[0].token_count, 2);
        assert_eq!(chunks[0].parent_seq, 7);
        assert_eq!(chunks[0].metadata, headline("A"));
    }

    #[test]
    fn long_text_is_split_in_order_within_bounds() {
        let body = (0..1000).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let chunker = TextChunker::with_unicode_words(ChunkerConfig::with_bounds(50, 400)).unwrap();
        let chunks = chunker.chunk(1, &body, &headline("long"));

        assert!(chunks.len() >= 3);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.position, position);
            assert!(chunk.token_count <= 400);
            assert_eq!(chunk.metadata, headline("long"));
        }
        assert!(chunks[0].text.starts_with("word0 "));
        assert!(chunks.last().unwrap().text.ends_with("word999"));
    }

    #[test]
    fn concatenated_chunks_reconstruct_the_body() {
        let body = "First sentence here. Second one follows!\n\nA new paragraph starts, \
                    and it keeps going for a while; then it stops. "
            .repeat(20);
        let chunker = TextChunker::with_unicode_words(ChunkerConfig::with_bounds(5, 30)).unwrap();
        let chunks = chunker.chunk(0, &body, &ChunkMetadata::new());

        assert!(chunks.len() > 1);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(strip_whitespace(&joined), strip_whitespace(&body));
    }

    #[test]
    fn multibyte_text_respects_max_tokens_under_byte_level_bpe() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::write_byte_level_tokenizer(dir.path(), "byte-bpe");
        let encoding = resolve_encoding("byte-bpe", Some(dir.path())).unwrap();
        let chunker = TextChunker::new(ChunkerConfig::with_bounds(1, 4), encoding).unwrap();

        let chunks = chunker.chunk(0, "日本語のニュース記事です", &ChunkMetadata::new());
        // Each character is three tokens, so only one fits under four.
        assert_eq!(chunks.len(), 12);
        for chunk in &chunks {
            assert_eq!(chunk.text.chars().count(), 1);
            assert_eq!(chunk.token_count, 3);
            assert_eq!(chunk.token_count, fixtures::raw_token_count(&path, &chunk.text));
        }
    }

    #[test]
    fn mixed_text_token_counts_add_up_under_byte_level_bpe() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::write_byte_level_tokenizer(dir.path(), "byte-bpe");
        let encoding = resolve_encoding(path.to_str().unwrap(), None).unwrap();
        let chunker = TextChunker::new(ChunkerConfig::with_bounds(2, 6), encoding).unwrap();

        let body = "The theme of the day: the weather. Then the other thing!\n".repeat(5)
            + "Zürich café ☕ 日本語のニュース記事です。";
        let chunks = chunker.chunk(1, &body, &ChunkMetadata::new());

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.token_count > 0 && chunk.token_count <= 6, "{chunk:?}");
        }
        let reported: usize = chunks.iter().map(|c| c.token_count).sum();
        assert_eq!(reported, fixtures::raw_token_count(&path, &body));
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, body);
    }

    #[test]
    fn empty_text_still_yields_one_chunk() {
        let chunker = TextChunker::with_unicode_words(ChunkerConfig::default()).unwrap();
        for text in ["", "   \n "] {
            let chunks = chunker.chunk(3, text, &headline("empty"));
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].text, "");
            assert_eq!(chunks[0].token_count, 0);
        }
    }

    #[test]
    fn fallback_mode_keeps_whole_body() {
        let chunker = TextChunker::fallback(ChunkerConfig::with_bounds(1, 2)).unwrap();
        assert!(!chunker.splitter_available());

        let body = "this body is far longer than two tokens";
        let chunks = chunker.chunk(9, body, &headline("fb"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, body);
        assert_eq!(chunks[0].metadata, headline("fb"));
    }

    #[test]
    fn failing_encoding_degrades_to_one_chunk() {
        let chunker =
            TextChunker::new(ChunkerConfig::with_bounds(1, 2), Arc::new(FailingEncoding)).unwrap();
        assert!(chunker.splitter_available());

        let body = "one two three four five";
        let chunks = chunker.chunk(2, body, &ChunkMetadata::new());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, body);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(TextChunker::with_unicode_words(ChunkerConfig::with_bounds(10, 5)).is_err());
        assert!(TextChunker::fallback(ChunkerConfig::with_bounds(0, 0)).is_err());
    }
}
