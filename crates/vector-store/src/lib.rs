//! # Feedrag Vector Store
//!
//! Embeddings and exact nearest-neighbor search for ingested chunks.
//!
//! ## Architecture
//!
//! ```text
//! chunk text
//!     │
//!     ├──> EmbeddingModel (ONNX sentence-transformer or stub)
//!     │      └─> Vector[D], D fixed at startup
//!     │
//!     └──> BruteForceIndex
//!            └─> cosine top-k, ties by ascending id
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use feedrag_vector_store::{BruteForceIndex, EmbeddingConfig, EmbeddingModel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let model = EmbeddingModel::load(&EmbeddingConfig::stub())?;
//!     let index = BruteForceIndex::with_capacity(model.dimension(), 1000)?;
//!
//!     index.insert(&model.embed("breaking news").await?, 0)?;
//!
//!     for hit in index.query(&model.embed("news").await?, 5)? {
//!         println!("{}: {:.3}", hit.id, hit.score);
//!     }
//!     Ok(())
//! }
//! ```

mod embeddings;
mod error;
mod index;
mod ort_backend;
mod types;

pub use embeddings::{
    EmbeddingBackend, EmbeddingConfig, EmbeddingMode, EmbeddingModel, StubBackend,
    DEFAULT_DIMENSION, DEFAULT_MODEL_ID,
};
pub use error::{Result, VectorStoreError};
pub use index::BruteForceIndex;
pub use types::{EntryId, IndexHit};
