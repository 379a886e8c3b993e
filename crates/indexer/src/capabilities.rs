use crate::error::Result;
use feedrag_chunker::{resolve_encoding, ChunkerConfig, TextChunker};
use log::{info, warn};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SplitterCapability {
    Available { encoding: String },
    Unavailable { reason: String },
}

/// Optional preprocessing stages, checked once at startup.
///
/// Components consume this record instead of re-checking availability per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Structured-document parsing is not part of this pipeline; records arrive as plain text.
    pub parser_available: bool,
    pub splitter: SplitterCapability,
}

impl Capabilities {
    /// Try the configured token encoding and build the chunker that matches the outcome.
    ///
    /// An unloadable encoding is not an error: the chunker is built in single-chunk mode. Only an
    /// invalid `config` fails.
    pub fn resolve(
        config: &ChunkerConfig,
        tokenizer_dir: Option<&Path>,
    ) -> Result<(Self, TextChunker)> {
        config.validate()?;
        let (splitter, chunker) = match resolve_encoding(&config.encoding_name, tokenizer_dir) {
            Ok(encoding) => {
                let name = encoding.name().to_string();
                info!(
                    "Token splitter '{name}' ready ({}..={} tokens per chunk)",
                    config.min_tokens, config.max_tokens
                );
                (
                    SplitterCapability::Available { encoding: name },
                    TextChunker::new(config.clone(), encoding)?,
                )
            }
            Err(e) => {
                warn!("Token splitter unavailable, every record becomes a single chunk: {e}");
                (
                    SplitterCapability::Unavailable {
                        reason: e.to_string(),
                    },
                    TextChunker::fallback(config.clone())?,
                )
            }
        };

        Ok((
            Self {
                parser_available: false,
                splitter,
            },
            chunker,
        ))
    }

    #[must_use]
    pub const fn splitter_available(&self) -> bool {
        matches!(self.splitter, SplitterCapability::Available { .. })
    }
}
