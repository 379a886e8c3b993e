use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Chunker error: {0}")]
    ChunkerError(#[from] feedrag_chunker::ChunkerError),

    #[error("Vector store error: {0}")]
    VectorStoreError(#[from] feedrag_vector_store::VectorStoreError),

    #[error("Source {path} unavailable: {reason}")]
    SourceUnavailable { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}
