use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata carried from a record to every chunk cut from it.
///
/// A `BTreeMap` keeps key order stable, so serialized chunks compare byte-for-byte.
pub type ChunkMetadata = BTreeMap<String, String>;

/// A bounded span of record text, the unit of embedding and retrieval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextChunk {
    /// Sequence number of the record this chunk was cut from
    pub parent_seq: u64,

    /// Position of this chunk within its record (0-indexed)
    pub position: usize,

    /// The chunk text, an exact slice of the record body
    pub text: String,

    /// Number of tokens under the encoding that produced the chunk
    pub token_count: usize,

    /// Copy of the parent record metadata
    pub metadata: ChunkMetadata,
}

impl TextChunk {
    /// Create a new chunk
    #[must_use]
    pub const fn new(
        parent_seq: u64,
        position: usize,
        text: String,
        token_count: usize,
        metadata: ChunkMetadata,
    ) -> Self {
        Self {
            parent_seq,
            position,
            text,
            token_count,
            metadata,
        }
    }

    /// Estimate tokens from content when no encoding is available (~4 chars per token)
    #[must_use]
    pub fn estimate_tokens_from_content(content: &str) -> usize {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return 0;
        }
        trimmed.chars().count().div_ceil(4)
    }
}
