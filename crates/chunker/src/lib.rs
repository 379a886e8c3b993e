//! # Feedrag Chunker
//!
//! Token-bounded chunking of news record bodies for embedding.
//!
//! ## Policy
//!
//! - No chunk exceeds `max_tokens` under the configured encoding
//! - Cuts land on sentence ends past `min_tokens` when one is available
//! - A short trailing span is folded into its predecessor when it fits
//! - Chunk order follows the source, and every chunk copies the record metadata
//! - Every text yields at least one chunk: without a usable splitter the whole body is one chunk
//!
//! ## Architecture
//!
//! ```text
//! Record body
//!     │
//!     ├──> TokenEncoding (unicode-words | tokenizer.json)
//!     │      └─> Token byte spans
//!     │
//!     ├──> SplitPlanner
//!     │      └─> Token ranges ≤ max_tokens
//!     │
//!     └──> TextChunk[] (exact source slices + metadata)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use feedrag_chunker::{ChunkMetadata, ChunkerConfig, TextChunker};
//!
//! let chunker = TextChunker::with_unicode_words(ChunkerConfig::default()).unwrap();
//! let metadata = ChunkMetadata::from([("headline".to_string(), "A".to_string())]);
//!
//! let chunks = chunker.chunk(0, "short text", &metadata);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "short text");
//! ```

mod chunker;
mod config;
mod encoding;
mod error;
mod strategy;
mod types;

pub use chunker::TextChunker;
pub use config::{ChunkerConfig, UNICODE_WORDS_ENCODING};
pub use encoding::{resolve_encoding, HfTokenizerEncoding, TokenEncoding, TokenSpan, UnicodeWords};
pub use error::{ChunkerError, Result};
pub use types::{ChunkMetadata, TextChunk};
