//! # Feedrag Indexer
//!
//! Streaming ingestion of a JSONL feed into an in-memory vector index.
//!
//! ## Pipeline
//!
//! ```text
//! feed.jsonl (append-only)
//!     │
//!     ├──> JsonlTailReader (every commit interval)
//!     │      └─> Raw records, in arrival order
//!     │
//!     ├──> Normalizer
//!     │      └─> Plain text + headline metadata
//!     │
//!     ├──> TextChunker (resolved once by Capabilities)
//!     │      └─> Bounded chunks
//!     │
//!     ├──> EmbeddingModel (batch embed)
//!     │
//!     └──> DocumentStore (atomic commit per chunk)
//!            └─> Searchable index
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use feedrag_chunker::ChunkerConfig;
//! use feedrag_indexer::{Capabilities, DocumentStore, JsonlTailReader, PipelineBuilder};
//! use feedrag_vector_store::{EmbeddingConfig, EmbeddingModel};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (_caps, chunker) = Capabilities::resolve(&ChunkerConfig::default(), None)?;
//!     let embedder = EmbeddingModel::load(&EmbeddingConfig::stub())?;
//!     let store = Arc::new(DocumentStore::new(embedder.dimension(), 1000)?);
//!
//!     let handle = PipelineBuilder::new()
//!         .source(JsonlTailReader::new("feed.jsonl"))
//!         .chunker(chunker)
//!         .embedder(embedder)
//!         .store(store)
//!         .build()?
//!         .spawn();
//!
//!     let mut updates = handle.subscribe_updates();
//!     let update = updates.recv().await?;
//!     println!("Ingested {} records, {} chunks", update.stats.records, update.stats.chunks);
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod capabilities;
mod error;
mod normalizer;
mod pipeline;
mod reader;
mod stats;
mod store;

pub use capabilities::{Capabilities, SplitterCapability};
pub use error::{IndexerError, Result};
pub use normalizer::{Document, Normalized, Normalizer, BODY_FIELD, HEADLINE_FIELD};
pub use pipeline::{
    IngestHealth, IngestUpdate, IngestionHandle, IngestionPipeline, PipelineBuilder,
    PipelineConfig,
};
pub use reader::{JsonlTailReader, RawRecord, RecordSource, SourceBatch};
pub use stats::PassStats;
pub use store::{ChunkId, DocumentStore, InputRecord, SearchHit, StoreStatistics};
