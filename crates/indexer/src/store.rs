use crate::error::{IndexerError, Result};
use crate::normalizer::Document;
use feedrag_chunker::{ChunkMetadata, TextChunk};
use feedrag_vector_store::{BruteForceIndex, VectorStoreError};
use serde::Serialize;
use std::sync::{Mutex, RwLock, RwLockReadGuard};
use std::time::SystemTime;

/// Identifier of a committed chunk; never reused
pub type ChunkId = u64;

/// Hydrated search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputRecord {
    pub seq: u64,
    pub metadata: ChunkMetadata,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    pub records: usize,
    pub chunks: usize,
    pub last_record_seq: Option<u64>,
    /// When the most recent chunk became searchable
    pub last_commit: Option<SystemTime>,
    /// When the most recent record was registered
    pub last_record_at: Option<SystemTime>,
    pub dimension: usize,
}

#[derive(Debug)]
struct StoredChunk {
    parent_seq: u64,
    text: String,
    token_count: usize,
    metadata: ChunkMetadata,
}

#[derive(Debug, Default)]
struct Hydration {
    /// Position equals chunk id
    chunks: Vec<StoredChunk>,
    records: Vec<InputRecord>,
    last_commit: Option<SystemTime>,
    last_record_at: Option<SystemTime>,
}

/// Chunks, their vectors and their metadata, kept consistent for concurrent readers.
///
/// The store is the only writer of its index. A commit publishes the hydration row first and the
/// index row second, so every id a query can find is already hydratable.
#[derive(Debug)]
pub struct DocumentStore {
    index: BruteForceIndex,
    docs: RwLock<Hydration>,
    writer: Mutex<()>,
}

impl DocumentStore {
    /// Create a store for vectors of `dimension`, pre-reserving room for `reserved` chunks
    pub fn new(dimension: usize, reserved: usize) -> Result<Self> {
        Ok(Self {
            index: BruteForceIndex::with_capacity(dimension, reserved)?,
            docs: RwLock::new(Hydration {
                chunks: Vec::with_capacity(reserved),
                ..Hydration::default()
            }),
            writer: Mutex::new(()),
        })
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.index.dimension()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Make one chunk searchable together with its vector.
    pub fn commit(&self, chunk: TextChunk, vector: &[f32]) -> Result<ChunkId> {
        if vector.len() != self.dimension() {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            }
            .into());
        }

        let _writer = self
            .writer
            .lock()
            .map_err(|_| IndexerError::Other("store writer lock poisoned".to_string()))?;

        let id = {
            let mut docs = self.write_docs()?;
            let id = docs.chunks.len() as ChunkId;
            docs.chunks.push(StoredChunk {
                parent_seq: chunk.parent_seq,
                text: chunk.text,
                token_count: chunk.token_count,
                metadata: chunk.metadata,
            });
            id
        };

        if let Err(e) = self.index.insert(vector, id) {
            // Not in the index yet, so no reader can have seen the row.
            self.write_docs()?.chunks.pop();
            return Err(e.into());
        }

        self.write_docs()?.last_commit = Some(SystemTime::now());
        Ok(id)
    }

    /// Record that `document` went through the pipeline with `chunk_count` committed chunks
    pub fn register_record(&self, document: &Document, chunk_count: usize) -> Result<()> {
        let mut docs = self.write_docs()?;
        docs.records.push(InputRecord {
            seq: document.seq,
            metadata: document.metadata.clone(),
            chunk_count,
        });
        docs.last_record_at = Some(SystemTime::now());
        Ok(())
    }

    /// Top-`k` chunks by cosine similarity.
    ///
    /// With a `filter`, only chunks whose metadata holds every filter pair compete for the `k`
    /// slots.
    pub fn search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&ChunkMetadata>,
    ) -> Result<Vec<SearchHit>> {
        let docs = self.read_docs()?;
        let hits = match filter.filter(|f| !f.is_empty()) {
            None => self.index.query(vector, k)?,
            Some(filter) => self.index.query_filtered(vector, k, |id| {
                docs.chunks
                    .get(id as usize)
                    .is_some_and(|chunk| matches_filter(&chunk.metadata, filter))
            })?,
        };

        hits.into_iter()
            .map(|hit| {
                let chunk = docs.chunks.get(hit.id as usize).ok_or_else(|| {
                    IndexerError::Other(format!("chunk {} is indexed but not stored", hit.id))
                })?;
                Ok(SearchHit {
                    chunk_id: hit.id,
                    score: hit.score,
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                })
            })
            .collect()
    }

    pub fn statistics(&self) -> Result<StoreStatistics> {
        let docs = self.read_docs()?;
        Ok(StoreStatistics {
            records: docs.records.len(),
            chunks: docs.chunks.len(),
            last_record_seq: docs.records.last().map(|r| r.seq),
            last_commit: docs.last_commit,
            last_record_at: docs.last_record_at,
            dimension: self.dimension(),
        })
    }

    /// Every registered record, in arrival order
    pub fn inputs(&self) -> Result<Vec<InputRecord>> {
        Ok(self.read_docs()?.records.clone())
    }

    /// Total tokens over all stored chunks of record `seq`
    pub fn record_tokens(&self, seq: u64) -> Result<usize> {
        Ok(self
            .read_docs()?
            .chunks
            .iter()
            .filter(|chunk| chunk.parent_seq == seq)
            .map(|chunk| chunk.token_count)
            .sum())
    }

    fn read_docs(&self) -> Result<RwLockReadGuard<'_, Hydration>> {
        self.docs
            .read()
            .map_err(|_| IndexerError::Other("document table lock poisoned".to_string()))
    }

    fn write_docs(&self) -> Result<std::sync::RwLockWriteGuard<'_, Hydration>> {
        self.docs
            .write()
            .map_err(|_| IndexerError::Other("document table lock poisoned".to_string()))
    }
}

fn matches_filter(metadata: &ChunkMetadata, filter: &ChunkMetadata) -> bool {
    filter
        .iter()
        .all(|(key, value)| metadata.get(key) == Some(value))
}
