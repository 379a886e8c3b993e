use crate::error::{ChunkerError, Result};
use serde::{Deserialize, Serialize};

/// Name of the built-in word-level encoding. It needs no external assets.
pub const UNICODE_WORDS_ENCODING: &str = "unicode-words";

/// Configuration for text chunking behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Minimum chunk size in tokens (soft: short spans are merged towards it)
    pub min_tokens: usize,

    /// Maximum chunk size in tokens (hard limit)
    pub max_tokens: usize,

    /// Tokenization scheme used to count tokens
    pub encoding_name: String,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_tokens: 50,
            max_tokens: 400,
            encoding_name: UNICODE_WORDS_ENCODING.to_string(),
        }
    }
}

impl ChunkerConfig {
    /// Create a config with explicit token bounds and the default encoding
    #[must_use]
    pub fn with_bounds(min_tokens: usize, max_tokens: usize) -> Self {
        Self {
            min_tokens,
            max_tokens,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(ChunkerError::invalid_config("max_tokens must be > 0"));
        }

        if self.min_tokens > self.max_tokens {
            return Err(ChunkerError::invalid_config(format!(
                "min_tokens ({}) cannot exceed max_tokens ({})",
                self.min_tokens, self.max_tokens
            )));
        }

        if self.encoding_name.trim().is_empty() {
            return Err(ChunkerError::invalid_config("encoding_name must be non-empty"));
        }

        Ok(())
    }
}
