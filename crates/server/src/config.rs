use anyhow::{bail, Context, Result};
use clap::Args;
use feedrag_chunker::{ChunkerConfig, UNICODE_WORDS_ENCODING};
use feedrag_indexer::PipelineConfig;
use feedrag_vector_store::{EmbeddingConfig, EmbeddingMode, DEFAULT_DIMENSION, DEFAULT_MODEL_ID};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Legacy variable still honoured when `EMBEDDING_MODEL` is unset
pub const LEGACY_MODEL_ENV: &str = "SENTENCE_TRANSFORMERS_MODEL";

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// JSONL feed to tail
    #[arg(long, env = "DATA_FILE", default_value = "./feed.jsonl")]
    pub data_file: PathBuf,

    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Sentence-transformer model id (falls back to SENTENCE_TRANSFORMERS_MODEL)
    #[arg(long, env = "EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Embedding backend: onnx|stub
    #[arg(long, env = "FEEDRAG_EMBEDDING_MODE", default_value = "onnx")]
    pub embedding_mode: String,

    /// Directory holding `<model>/model.onnx` and tokenizer files
    #[arg(long, env = "FEEDRAG_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    #[arg(long, env = "FEEDRAG_MIN_TOKENS", default_value_t = 50)]
    pub min_tokens: usize,

    #[arg(long, env = "FEEDRAG_MAX_TOKENS", default_value_t = 400)]
    pub max_tokens: usize,

    /// Token encoding used for chunking (built-in `unicode-words`, or a tokenizer.json name/path)
    #[arg(long, env = "FEEDRAG_ENCODING", default_value = UNICODE_WORDS_ENCODING)]
    pub encoding: String,

    /// How often the feed is polled and new chunks committed
    #[arg(long, env = "FEEDRAG_COMMIT_INTERVAL_MS", default_value_t = 500)]
    pub commit_interval_ms: u64,

    /// Chunks to pre-allocate in the index
    #[arg(long, env = "FEEDRAG_RESERVED_SPACE", default_value_t = 1000)]
    pub reserved_space: usize,
}

/// Fully validated settings for `feedrag serve`
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_file: PathBuf,
    pub bind: SocketAddr,
    pub embedding: EmbeddingConfig,
    pub chunker: ChunkerConfig,
    /// Where non-builtin token encodings are looked up
    pub tokenizer_dir: PathBuf,
    pub pipeline: PipelineConfig,
    pub reserved_space: usize,
}

impl ServeArgs {
    pub fn into_config(self) -> Result<ServerConfig> {
        let mode: EmbeddingMode = self.embedding_mode.parse()?;
        let model_id = self
            .embedding_model
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                std::env::var(LEGACY_MODEL_ENV)
                    .ok()
                    .filter(|m| !m.trim().is_empty())
            })
            .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string());

        let chunker = ChunkerConfig {
            min_tokens: self.min_tokens,
            max_tokens: self.max_tokens,
            encoding_name: self.encoding,
        };
        chunker.validate().context("Invalid chunking bounds")?;

        let pipeline = PipelineConfig {
            commit_interval: Duration::from_millis(self.commit_interval_ms),
        };
        pipeline.validate().context("Invalid commit interval")?;

        let bind = format!("{}:{}", self.host, self.port);
        let bind = bind
            .parse::<SocketAddr>()
            .or_else(|_| {
                use std::net::ToSocketAddrs;
                bind.to_socket_addrs()?
                    .next()
                    .ok_or_else(|| std::io::Error::other("no address"))
            })
            .with_context(|| format!("Cannot resolve bind address {bind}"))?;

        Ok(ServerConfig {
            data_file: self.data_file,
            bind,
            embedding: EmbeddingConfig {
                mode,
                model_id,
                model_dir: self.model_dir.clone(),
                default_dimension: DEFAULT_DIMENSION,
            },
            chunker,
            tokenizer_dir: self.model_dir,
            pipeline,
            reserved_space: self.reserved_space,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct QueryArgs {
    /// Query text
    pub query: String,

    /// Number of chunks to return (defaults to FEEDRAG_DEFAULT_TOP_K)
    #[arg(short, long)]
    pub k: Option<usize>,

    #[arg(long, env = "FEEDRAG_DEFAULT_TOP_K", default_value_t = 5)]
    pub default_top_k: usize,

    /// Exact-match metadata filter, e.g. `--filter headline=Markets` (repeatable)
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Base URL of a running `feedrag serve`
    #[arg(long, env = "FEEDRAG_URL", default_value = "http://127.0.0.1:8000")]
    pub url: String,
}

impl QueryArgs {
    pub fn top_k(&self) -> Result<usize> {
        if self.default_top_k == 0 {
            bail!("FEEDRAG_DEFAULT_TOP_K must be a positive integer");
        }
        Ok(self.k.unwrap_or(self.default_top_k))
    }

    pub fn metadata_filter(&self) -> Result<Option<feedrag_protocol::Metadata>> {
        if self.filters.is_empty() {
            return Ok(None);
        }
        self.filters
            .iter()
            .map(|raw| {
                raw.split_once('=')
                    .map(|(key, value)| (key.trim().to_string(), value.to_string()))
                    .filter(|(key, _)| !key.is_empty())
                    .with_context(|| format!("Invalid filter '{raw}', expected KEY=VALUE"))
            })
            .collect::<Result<_>>()
            .map(Some)
    }
}
