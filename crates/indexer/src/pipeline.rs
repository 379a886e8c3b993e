use crate::normalizer::{Document, Normalizer};
use crate::reader::{RawRecord, RecordSource};
use crate::stats::PassStats;
use crate::store::DocumentStore;
use crate::{IndexerError, Result};
use feedrag_chunker::TextChunker;
use feedrag_vector_store::EmbeddingModel;
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{broadcast, mpsc, watch, Mutex as TokioMutex};
use tokio::task::{spawn_blocking, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// How often the source is polled; bounds append-to-visibility latency
    pub commit_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            commit_interval: Duration::from_millis(500),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.commit_interval.is_zero() {
            return Err(IndexerError::InvalidConfig(
                "commit interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestHealth {
    pub records_ingested: u64,
    pub records_dropped: u64,
    pub chunks_committed: u64,
    pub chunks_rejected: u64,
    pub anomalies: u64,
    pub passes: u64,
    pub source_available: bool,
    pub last_error: Option<String>,
    pub last_commit: Option<SystemTime>,
}

impl IngestHealth {
    fn initial() -> Self {
        Self {
            records_ingested: 0,
            records_dropped: 0,
            chunks_committed: 0,
            chunks_rejected: 0,
            anomalies: 0,
            passes: 0,
            source_available: true,
            last_error: None,
            last_commit: None,
        }
    }

    fn absorb(&mut self, stats: &PassStats) {
        self.records_ingested += stats.records as u64;
        self.records_dropped += stats.dropped as u64;
        self.chunks_committed += stats.chunks as u64;
        self.chunks_rejected += stats.rejected as u64;
        self.anomalies += stats.anomalies as u64;
        if stats.chunks > 0 {
            self.last_commit = Some(SystemTime::now());
        }
    }
}

/// Broadcast after every pass that consumed input
#[derive(Debug, Clone)]
pub struct IngestUpdate {
    pub completed_at: SystemTime,
    pub stats: PassStats,
}

/// Wires the ingestion stages together.
///
/// Every stage is injected, so tests can swap the source or the embedding backend.
#[derive(Default)]
pub struct PipelineBuilder {
    source: Option<Box<dyn RecordSource>>,
    normalizer: Normalizer,
    chunker: Option<TextChunker>,
    embedder: Option<EmbeddingModel>,
    store: Option<Arc<DocumentStore>>,
    config: PipelineConfig,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn source(mut self, source: impl RecordSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    #[must_use]
    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    #[must_use]
    pub fn chunker(mut self, chunker: TextChunker) -> Self {
        self.chunker = Some(chunker);
        self
    }

    #[must_use]
    pub fn embedder(mut self, embedder: EmbeddingModel) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<IngestionPipeline> {
        self.config.validate()?;
        let missing = |stage: &str| IndexerError::InvalidConfig(format!("pipeline has no {stage}"));
        let source = self.source.ok_or_else(|| missing("source"))?;
        let chunker = self.chunker.ok_or_else(|| missing("chunker"))?;
        let embedder = self.embedder.ok_or_else(|| missing("embedder"))?;
        let store = self.store.ok_or_else(|| missing("document store"))?;

        if embedder.dimension() != store.dimension() {
            return Err(IndexerError::InvalidConfig(format!(
                "embedder '{}' produces {}-dimensional vectors but the store holds {}",
                embedder.model_id(),
                embedder.dimension(),
                store.dimension()
            )));
        }

        Ok(IngestionPipeline {
            source,
            normalizer: self.normalizer,
            chunker,
            embedder,
            store,
            config: self.config,
            health: IngestHealth::initial(),
        })
    }
}

/// Source → normalizer → chunker → embedder → document store
pub struct IngestionPipeline {
    source: Box<dyn RecordSource>,
    normalizer: Normalizer,
    chunker: TextChunker,
    embedder: EmbeddingModel,
    store: Arc<DocumentStore>,
    config: PipelineConfig,
    health: IngestHealth,
}

impl IngestionPipeline {
    #[must_use]
    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    #[must_use]
    pub const fn health(&self) -> &IngestHealth {
        &self.health
    }

    /// Poll the source once and ingest everything it returned
    pub async fn run_once(&mut self) -> PassStats {
        let started = Instant::now();
        let mut stats = PassStats::default();

        match self.source.poll().await {
            Ok(batch) => {
                if !self.health.source_available {
                    info!("{} is readable again", self.source.describe());
                    self.health.source_available = true;
                }
                stats.dropped += batch.anomalies.len();
                stats.anomalies += batch.anomalies.len();
                for record in batch.records {
                    self.ingest_record(record, &mut stats).await;
                }
            }
            Err(e) => {
                let message = e.to_string();
                if self.health.source_available {
                    warn!("{message}; retrying every {:?}", self.config.commit_interval);
                }
                self.health.source_available = false;
                self.health.last_error = Some(message);
            }
        }

        stats.time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.health.passes += 1;
        self.health.absorb(&stats);
        if !stats.is_idle() {
            debug!(
                "Ingestion pass: {} record(s), {} chunk(s), {} dropped, {} rejected in {} ms",
                stats.records, stats.chunks, stats.dropped, stats.rejected, stats.time_ms
            );
        }
        stats
    }

    async fn ingest_record(&mut self, record: RawRecord, stats: &mut PassStats) {
        let normalized = self.normalizer.normalize(&record);
        stats.anomalies += normalized.anomalies.len();
        let document = normalized.document;

        let chunks = self
            .chunker
            .chunk(document.seq, &document.text, &document.metadata);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = match self.embedder.embed_batch(texts).await {
            Ok(vectors) => vectors,
            Err(e) => {
                error!("Dropping record {}: embedding failed: {e}", document.seq);
                self.health.last_error = Some(format!("record {}: {e}", document.seq));
                stats.dropped += 1;
                return;
            }
        };

        // Commits wait on the store's write lock, which a running search may hold.
        let store = self.store.clone();
        let outcomes = spawn_blocking(move || {
            chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| {
                    let position = chunk.position;
                    store.commit(chunk, &vector).map_err(|e| (position, e))
                })
                .collect::<Vec<_>>()
        })
        .await;
        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!("Dropping record {}: commit task failed: {e}", document.seq);
                self.health.last_error = Some(format!("record {}: {e}", document.seq));
                stats.dropped += 1;
                return;
            }
        };

        let mut committed = 0;
        for outcome in outcomes {
            match outcome {
                Ok(_) => committed += 1,
                Err((position, e)) => {
                    warn!("Skipping chunk {position} of record {}: {e}", document.seq);
                    self.health.last_error = Some(format!("record {}: {e}", document.seq));
                    stats.rejected += 1;
                }
            }
        }
        stats.chunks += committed;

        self.register(&document, committed, stats);
    }

    fn register(&mut self, document: &Document, committed: usize, stats: &mut PassStats) {
        match self.store.register_record(document, committed) {
            Ok(()) => stats.records += 1,
            Err(e) => {
                error!("Failed to register record {}: {e}", document.seq);
                self.health.last_error = Some(e.to_string());
                stats.dropped += 1;
            }
        }
    }

    /// Run the ingestion loop on the tokio runtime until shut down
    #[must_use]
    pub fn spawn(self) -> IngestionHandle {
        let (command_tx, command_rx) = mpsc::channel(4);
        let (health_tx, _) = watch::channel(self.health.clone());
        let (update_tx, _) = broadcast::channel(32);
        let store = self.store.clone();

        let task = tokio::spawn(run_loop(
            self,
            command_rx,
            health_tx.clone(),
            update_tx.clone(),
        ));

        IngestionHandle {
            inner: Arc::new(HandleInner {
                command_tx,
                update_tx,
                health_tx,
                store,
                task: TokioMutex::new(Some(task)),
            }),
        }
    }
}

enum PipelineCommand {
    Shutdown,
}

async fn run_loop(
    mut pipeline: IngestionPipeline,
    mut command_rx: mpsc::Receiver<PipelineCommand>,
    health_tx: watch::Sender<IngestHealth>,
    update_tx: broadcast::Sender<IngestUpdate>,
) {
    let mut ticker = time::interval(pipeline.config.commit_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Ingesting from {} every {:?}",
        pipeline.source.describe(),
        pipeline.config.commit_interval
    );

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(PipelineCommand::Shutdown) | None => break,
            },
            _ = ticker.tick() => {
                let stats = pipeline.run_once().await;
                health_tx.send_replace(pipeline.health.clone());
                if !stats.is_idle() {
                    let _ = update_tx.send(IngestUpdate {
                        completed_at: SystemTime::now(),
                        stats,
                    });
                }
            }
        }
    }

    info!(
        "Ingestion stopped after {} record(s), {} chunk(s)",
        pipeline.health.records_ingested, pipeline.health.chunks_committed
    );
}

/// Control surface of a running ingestion loop
#[derive(Clone)]
pub struct IngestionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    command_tx: mpsc::Sender<PipelineCommand>,
    update_tx: broadcast::Sender<IngestUpdate>,
    health_tx: watch::Sender<IngestHealth>,
    store: Arc<DocumentStore>,
    task: TokioMutex<Option<JoinHandle<()>>>,
}

impl IngestionHandle {
    #[must_use]
    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.inner.store
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<IngestUpdate> {
        self.inner.update_tx.subscribe()
    }

    #[must_use]
    pub fn health_snapshot(&self) -> IngestHealth {
        self.inner.health_tx.borrow().clone()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<IngestHealth> {
        self.inner.health_tx.subscribe()
    }

    /// Stop the loop and wait for the in-flight pass to finish
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.inner.command_tx.send(PipelineCommand::Shutdown).await;
        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            task.await
                .map_err(|e| IndexerError::Other(format!("ingestion task failed: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SourceBatch;
    use async_trait::async_trait;
    use feedrag_chunker::ChunkerConfig;
    use feedrag_vector_store::{EmbeddingBackend, StubBackend, VectorStoreError};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replays scripted poll results
    struct ScriptedSource {
        polls: VecDeque<Result<Vec<serde_json::Value>>>,
        next_seq: u64,
    }

    impl ScriptedSource {
        fn new(polls: Vec<Result<Vec<serde_json::Value>>>) -> Self {
            Self {
                polls: polls.into(),
                next_seq: 0,
            }
        }
    }

    #[async_trait]
    impl RecordSource for ScriptedSource {
        async fn poll(&mut self) -> Result<SourceBatch> {
            let values = self.polls.pop_front().unwrap_or_else(|| Ok(Vec::new()))?;
            let mut batch = SourceBatch::default();
            for value in values {
                match value {
                    serde_json::Value::Object(fields) => {
                        batch.records.push(RawRecord {
                            seq: self.next_seq,
                            fields,
                        });
                        self.next_seq += 1;
                    }
                    other => batch.anomalies.push(format!("not an object: {other}")),
                }
            }
            Ok(batch)
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Fails for any text containing "poison"
    struct PickyBackend(StubBackend);

    impl EmbeddingBackend for PickyBackend {
        fn model_id(&self) -> &str {
            self.0.model_id()
        }

        fn native_dimension(&self) -> Option<usize> {
            self.0.native_dimension()
        }

        fn embed_batch_blocking(
            &self,
            texts: &[String],
        ) -> feedrag_vector_store::Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("poison")) {
                return Err(VectorStoreError::EmbeddingError("poisoned input".to_string()));
            }
            self.0.embed_batch_blocking(texts)
        }
    }

    fn pipeline(source: ScriptedSource) -> IngestionPipeline {
        let backend = Arc::new(PickyBackend(StubBackend::new("test", 16)));
        let embedder = EmbeddingModel::from_backend(backend, 16);
        PipelineBuilder::new()
            .source(source)
            .chunker(TextChunker::with_unicode_words(ChunkerConfig::with_bounds(2, 4)).unwrap())
            .embedder(embedder)
            .store(Arc::new(DocumentStore::new(16, 8).unwrap()))
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_every_stage() {
        let err = PipelineBuilder::new().build().err().expect("no stages");
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn build_rejects_dimension_disagreement() {
        let embedder = EmbeddingModel::from_backend(Arc::new(StubBackend::new("m", 8)), 8);
        let err = PipelineBuilder::new()
            .source(ScriptedSource::new(vec![]))
            .chunker(TextChunker::with_unicode_words(ChunkerConfig::default()).unwrap())
            .embedder(embedder)
            .store(Arc::new(DocumentStore::new(16, 0).unwrap()))
            .build()
            .err()
            .expect("dimension mismatch");
        assert!(matches!(err, IndexerError::InvalidConfig(_)));
    }

    #[test]
    fn zero_commit_interval_is_invalid() {
        let config = PipelineConfig {
            commit_interval: Duration::ZERO,
        };
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn run_once_ingests_and_counts() {
        let mut pipeline = pipeline(ScriptedSource::new(vec![Ok(vec![
            json!({"headline": "A", "body": "one two three four five six seven"}),
            json!("garbage"),
            json!({"headline": "B", "body": "a poison pill"}),
            json!({"headline": ["C"]}),
        ])]));

        let stats = pipeline.run_once().await;
        assert_eq!(stats.records, 2);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.rejected, 0);
        // The garbage entry plus the missing body of record C.
        assert_eq!(stats.anomalies, 2);

        let inputs = pipeline.store().inputs().unwrap();
        let seqs: Vec<u64> = inputs.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 2]);
        assert_eq!(inputs[0].chunk_count, 2);
        assert_eq!(inputs[1].chunk_count, 1);

        let health = pipeline.health();
        assert_eq!(health.records_ingested, 2);
        assert_eq!(health.chunks_committed, 3);
        assert!(health.last_error.as_deref().unwrap_or_default().contains("poisoned"));
        assert!(health.last_commit.is_some());
    }

    #[tokio::test]
    async fn source_errors_are_retried() {
        let mut pipeline = pipeline(ScriptedSource::new(vec![
            Err(IndexerError::SourceUnavailable {
                path: "feed.jsonl".to_string(),
                reason: "file not found".to_string(),
            }),
            Ok(vec![json!({"headline": "A", "body": "back again"})]),
        ]));

        let stats = pipeline.run_once().await;
        assert!(stats.is_idle());
        assert!(!pipeline.health().source_available);

        let stats = pipeline.run_once().await;
        assert_eq!(stats.records, 1);
        assert!(pipeline.health().source_available);
        assert_eq!(pipeline.store().len(), 1);
    }

    #[tokio::test]
    async fn spawned_loop_publishes_health_and_updates() {
        let handle = pipeline(ScriptedSource::new(vec![Ok(vec![
            json!({"headline": "A", "body": "short text"}),
        ])]))
        .spawn();
        let mut updates = handle.subscribe_updates();

        let update = time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .expect("update before timeout")
            .expect("channel open");
        assert_eq!(update.stats.records, 1);

        let mut health = handle.health_stream();
        health
            .wait_for(|h| h.chunks_committed == 1)
            .await
            .expect("health published");
        assert_eq!(handle.health_snapshot().records_ingested, 1);
        assert_eq!(handle.store().len(), 1);

        handle.shutdown().await.unwrap();
        handle.shutdown().await.unwrap();
    }
}
