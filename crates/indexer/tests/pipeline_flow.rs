use feedrag_chunker::{ChunkMetadata, ChunkerConfig};
use feedrag_indexer::{
    Capabilities, DocumentStore, IngestUpdate, IngestionPipeline, JsonlTailReader,
    PipelineBuilder, PipelineConfig,
};
use feedrag_vector_store::{EmbeddingConfig, EmbeddingModel};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast::Receiver;

const COMMIT_INTERVAL: Duration = Duration::from_millis(100);

fn stub_embedder() -> EmbeddingModel {
    EmbeddingModel::load(&EmbeddingConfig::stub()).expect("stub embedder")
}

fn append_line(path: &Path, value: &serde_json::Value) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open feed");
    // One write per line so the tailer never sees a complete object without its newline.
    file.write_all(format!("{value}\n").as_bytes())
        .expect("append record");
}

fn build(path: &Path, embedder: EmbeddingModel) -> IngestionPipeline {
    let (_caps, chunker) =
        Capabilities::resolve(&ChunkerConfig::default(), None).expect("capabilities");
    let store = Arc::new(DocumentStore::new(embedder.dimension(), 1000).expect("store"));
    PipelineBuilder::new()
        .source(JsonlTailReader::new(path))
        .chunker(chunker)
        .embedder(embedder)
        .store(store)
        .config(PipelineConfig {
            commit_interval: COMMIT_INTERVAL,
        })
        .build()
        .expect("pipeline")
}

async fn wait_for_records(
    updates: &mut Receiver<IngestUpdate>,
    timeout: Duration,
) -> Option<IngestUpdate> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match tokio::time::timeout(remaining, updates.recv()).await {
            Ok(Ok(update)) if update.stats.records > 0 => return Some(update),
            Ok(Ok(_)) | Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(_)) | Err(_) => return None,
        }
    }
}

#[tokio::test]
async fn short_record_becomes_one_chunk() {
    let temp = TempDir::new().expect("tempdir");
    let feed = temp.path().join("feed.jsonl");
    append_line(&feed, &serde_json::json!({"headline": "A", "body": "short text"}));

    let embedder = stub_embedder();
    let mut pipeline = build(&feed, embedder.clone());
    pipeline.run_once().await;

    let store = pipeline.store().clone();
    assert_eq!(store.len(), 1);

    let query = embedder.embed("short text").await.expect("embed");
    let hits = store.search(&query, 5, None).expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].text, "short text");
    assert_eq!(hits[0].metadata["headline"], "A");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn long_record_is_split_within_bounds() {
    let temp = TempDir::new().expect("tempdir");
    let feed = temp.path().join("feed.jsonl");
    let body = (0..1000).map(|i| format!("token{i}")).collect::<Vec<_>>().join(" ");
    append_line(&feed, &serde_json::json!({"headline": "Long", "body": body}));

    let mut pipeline = build(&feed, stub_embedder());
    let stats = pipeline.run_once().await;
    assert_eq!(stats.records, 1);
    assert!(stats.chunks >= 3, "expected at least 3 chunks, got {}", stats.chunks);

    let store = pipeline.store();
    let inputs = store.inputs().expect("inputs");
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].chunk_count, stats.chunks);
    assert_eq!(store.record_tokens(0).expect("tokens"), 1000);
}

#[tokio::test]
async fn query_before_ingestion_is_empty() {
    let temp = TempDir::new().expect("tempdir");
    let feed = temp.path().join("feed.jsonl");

    let embedder = stub_embedder();
    let pipeline = build(&feed, embedder.clone());
    let query = embedder.embed("short text").await.expect("embed");
    assert!(pipeline
        .store()
        .search(&query, 1, None)
        .expect("search")
        .is_empty());
}

#[tokio::test]
async fn identical_bodies_tie_by_ascending_chunk_id() {
    let temp = TempDir::new().expect("tempdir");
    let feed = temp.path().join("feed.jsonl");
    append_line(&feed, &serde_json::json!({"headline": "first", "body": "same words"}));
    append_line(&feed, &serde_json::json!({"headline": "other", "body": "unrelated"}));
    append_line(&feed, &serde_json::json!({"headline": "second", "body": "same words"}));

    let embedder = stub_embedder();
    let mut pipeline = build(&feed, embedder.clone());
    pipeline.run_once().await;

    let query = embedder.embed("same words").await.expect("embed");
    let store = pipeline.store();

    let hits = store.search(&query, 2, None).expect("search");
    let ids: Vec<u64> = hits.iter().map(|h| h.chunk_id).collect();
    assert_eq!(ids, vec![0, 2]);
    assert_eq!(hits[0].score, hits[1].score);

    let top = store.search(&query, 1, None).expect("search");
    assert_eq!(top[0].metadata["headline"], "first");

    let filter = ChunkMetadata::from([("headline".to_string(), "second".to_string())]);
    let filtered = store.search(&query, 1, Some(&filter)).expect("search");
    assert_eq!(filtered[0].chunk_id, 2);
}

#[tokio::test]
async fn repeated_queries_return_identical_results() {
    let temp = TempDir::new().expect("tempdir");
    let feed = temp.path().join("feed.jsonl");
    for i in 0..20 {
        append_line(
            &feed,
            &serde_json::json!({"headline": format!("h{i}"), "body": format!("story number {i}")}),
        );
    }

    let embedder = stub_embedder();
    let mut pipeline = build(&feed, embedder.clone());
    pipeline.run_once().await;

    let query = embedder.embed("story number 7").await.expect("embed");
    let first = pipeline.store().search(&query, 5, None).expect("search");
    let second = pipeline.store().search(&query, 5, None).expect("search");
    assert_eq!(first, second);
    assert_eq!(first[0].text, "story number 7");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn appended_record_becomes_queryable_within_commit_interval() {
    let temp = TempDir::new().expect("tempdir");
    let feed = temp.path().join("feed.jsonl");
    append_line(&feed, &serde_json::json!({"headline": "old", "body": "yesterday's news"}));

    let embedder = stub_embedder();
    let handle = build(&feed, embedder.clone()).spawn();
    let mut health = handle.health_stream();
    tokio::time::timeout(
        Duration::from_secs(5),
        health.wait_for(|h| h.records_ingested == 1),
    )
    .await
    .expect("initial ingest timed out")
    .expect("health channel open");
    let mut updates = handle.subscribe_updates();

    let start = Instant::now();
    append_line(&feed, &serde_json::json!({"headline": "fresh", "body": "breaking story"}));
    wait_for_records(&mut updates, Duration::from_secs(5))
        .await
        .unwrap_or_else(|| {
            panic!(
                "append was not ingested (health={:?})",
                handle.health_snapshot()
            )
        });
    let elapsed = start.elapsed();

    let query = embedder.embed("breaking story").await.expect("embed");
    let hits = handle.store().search(&query, 1, None).expect("search");
    assert_eq!(hits[0].metadata["headline"], "fresh");
    assert!(
        elapsed < COMMIT_INTERVAL * 10,
        "append-to-visibility latency too high: {elapsed:?}"
    );

    let health = handle.health_snapshot();
    assert_eq!(health.records_ingested, 2);
    assert_eq!(health.records_dropped, 0);

    handle.shutdown().await.expect("shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queries_stay_consistent_while_ingesting() {
    let temp = TempDir::new().expect("tempdir");
    let feed = temp.path().join("feed.jsonl");
    std::fs::write(&feed, "").expect("create feed");

    let embedder = stub_embedder();
    let handle = build(&feed, embedder.clone()).spawn();

    let writer = {
        let feed = feed.clone();
        tokio::spawn(async move {
            for i in 0..60 {
                append_line(
                    &feed,
                    &serde_json::json!({"headline": format!("h{i}"), "body": format!("item {i}")}),
                );
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let query = embedder.embed("item 3").await.expect("embed");
    let mut last_len = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.store().len() < 60 && Instant::now() < deadline {
        let hits = handle.store().search(&query, 100, None).expect("search");
        assert!(hits.len() >= last_len, "index must never shrink");
        for hit in &hits {
            assert!(hit.text.starts_with("item "), "unhydrated hit {hit:?}");
        }
        last_len = hits.len();
        tokio::task::yield_now().await;
    }

    writer.await.expect("writer");
    assert_eq!(handle.store().len(), 60, "health={:?}", handle.health_snapshot());
    handle.shutdown().await.expect("shutdown");
}
