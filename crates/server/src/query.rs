use anyhow::{bail, Result};
use feedrag_indexer::{DocumentStore, HEADLINE_FIELD};
use feedrag_protocol::{
    codes, ErrorEnvelope, InputEntry, RetrieveRequest, RetrievedChunk, StatisticsResponse,
};
use feedrag_vector_store::EmbeddingModel;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::spawn_blocking;

/// Answers retrieval and introspection requests against the live store.
///
/// Reads never wait for ingestion: every call sees the chunks committed before it started.
#[derive(Clone, Debug)]
pub struct QueryService {
    embedder: EmbeddingModel,
    store: Arc<DocumentStore>,
}

impl QueryService {
    pub fn new(embedder: EmbeddingModel, store: Arc<DocumentStore>) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            bail!(
                "Embedding model '{}' produces {}-dimensional vectors but the index holds {}",
                embedder.model_id(),
                embedder.dimension(),
                store.dimension()
            );
        }
        Ok(Self { embedder, store })
    }

    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    pub async fn retrieve(
        &self,
        request: &RetrieveRequest,
    ) -> std::result::Result<Vec<RetrievedChunk>, ErrorEnvelope> {
        let vector = self.embedder.embed(&request.query).await.map_err(|e| {
            log::warn!("Query embedding failed: {e}");
            ErrorEnvelope::new(codes::EMBEDDING_FAILED, format!("Failed to embed query: {e}"))
                .with_hint("Check the embedding model files and retry")
        })?;

        // The scan is linear in the index size; keep it off the async workers.
        let store = self.store.clone();
        let k = request.k;
        let filter = request.metadata_filter.clone();
        let hits = spawn_blocking(move || store.search(&vector, k, filter.as_ref()))
            .await
            .map_err(internal)?
            .map_err(internal)?;

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                chunk_id: hit.chunk_id,
                text: hit.text,
                score: hit.score,
                metadata: hit.metadata,
            })
            .collect())
    }

    pub fn statistics(&self) -> std::result::Result<StatisticsResponse, ErrorEnvelope> {
        let stats = self.store.statistics().map_err(internal)?;
        Ok(StatisticsResponse {
            file_count: stats.records,
            chunk_count: stats.chunks,
            last_indexed: stats.last_commit.and_then(unix_seconds),
            last_modified: stats.last_record_at.and_then(unix_seconds),
            dimension: stats.dimension,
            model: self.model_id().to_string(),
        })
    }

    pub fn inputs(&self) -> std::result::Result<Vec<InputEntry>, ErrorEnvelope> {
        Ok(self
            .store
            .inputs()
            .map_err(internal)?
            .into_iter()
            .map(|record| InputEntry {
                seq: record.seq,
                headline: record
                    .metadata
                    .get(HEADLINE_FIELD)
                    .cloned()
                    .unwrap_or_default(),
                chunk_count: record.chunk_count,
            })
            .collect())
    }
}

fn internal(err: impl std::fmt::Display) -> ErrorEnvelope {
    log::error!("Query failed: {err}");
    ErrorEnvelope::new(codes::INTERNAL, err.to_string())
}

fn unix_seconds(at: SystemTime) -> Option<u64> {
    at.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}
