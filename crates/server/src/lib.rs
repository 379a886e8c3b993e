//! # Feedrag Server
//!
//! The `feedrag` binary: tails a JSONL feed into the vector index and serves retrieval over HTTP.
//!
//! ```text
//! feedrag serve                      # ingest DATA_FILE, listen on HOST:PORT
//! feedrag query "rate decision" -k 3 # ask a running server
//! ```

pub mod config;
pub mod http_api;
pub mod query;

pub use config::{QueryArgs, ServeArgs, ServerConfig};
pub use http_api::AppState;
pub use query::QueryService;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedrag_indexer::{
    Capabilities, DocumentStore, IngestionHandle, JsonlTailReader, PipelineBuilder,
};
use feedrag_protocol::{
    ErrorEnvelope, RetrieveRequest, RetrievedChunk, HEALTH_ROUTE, RETRIEVE_ROUTE,
};
use feedrag_vector_store::EmbeddingModel;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "feedrag")]
#[command(about = "Live semantic retrieval over an append-only JSONL feed", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the feed and serve the retrieval API
    Serve(ServeArgs),

    /// Query a running server and print the hits as JSON
    Query(QueryArgs),
}

pub async fn main_entry() -> Result<()> {
    let mut cli = Cli::parse();

    // Keep stdout clean for JSON consumers.
    if matches!(cli.command, Commands::Query(_)) {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    if !cli.verbose {
        builder.filter_module("ort", log::LevelFilter::Off);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Serve(args) => run_serve(args).await?,
        Commands::Query(args) => run_query(args).await?,
    }

    Ok(())
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = args.into_config()?;
    let server = Server::bind(config).await?;
    let base_url = format!("http://{}", server.local_addr()?);

    print_stdout(&format!("Serving retrieval API: {base_url}{RETRIEVE_ROUTE}"))?;
    print_stdout(&format!("Health endpoint: {base_url}{HEALTH_ROUTE}"))?;
    print_stdout(&format!(
        "Try: curl -X POST {base_url}{RETRIEVE_ROUTE} -H 'Content-Type: application/json' -d '{{\"query\": \"...\", \"k\": 5}}'"
    ))?;

    server
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {err}");
            }
            log::info!("Shutting down");
        })
        .await
}

async fn run_query(args: QueryArgs) -> Result<()> {
    let request = RetrieveRequest {
        query: args.query.clone(),
        k: args.top_k()?,
        metadata_filter: args.metadata_filter()?,
    };
    let url = format!("{}{RETRIEVE_ROUTE}", args.url.trim_end_matches('/'));

    let response = reqwest::Client::new()
        .post(&url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("Cannot reach {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let envelope: ErrorEnvelope = response
            .json()
            .await
            .with_context(|| format!("Server answered {status} without an error body"))?;
        let (code, message) = (envelope.code, envelope.message);
        match envelope.hint {
            Some(hint) => anyhow::bail!("{code} ({status}): {message}\nHint: {hint}"),
            None => anyhow::bail!("{code} ({status}): {message}"),
        }
    }

    let hits: Vec<RetrievedChunk> = response
        .json()
        .await
        .context("Malformed retrieve response")?;
    print_stdout(&serde_json::to_string_pretty(&hits)?)
}

/// A bound listener with its ingestion loop already running
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    /// Build every component from `config`, bind the listener and start ingesting.
    ///
    /// Fails when the embedder cannot be loaded or the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let embedding = config.embedding.clone();
        let embedder = tokio::task::spawn_blocking(move || EmbeddingModel::load(&embedding))
            .await
            .context("Embedder loading task failed")?
            .with_context(|| {
                format!(
                    "Failed to load embedding model '{}' from {}",
                    config.embedding.model_id,
                    config.embedding.model_dir.display()
                )
            })?;
        log::info!(
            "Embedding model '{}' ready ({} dimensions, {} backend)",
            embedder.model_id(),
            embedder.dimension(),
            config.embedding.mode
        );

        let (capabilities, chunker) =
            Capabilities::resolve(&config.chunker, Some(config.tokenizer_dir.as_path()))?;
        let store = Arc::new(DocumentStore::new(
            embedder.dimension(),
            config.reserved_space,
        )?);
        let query = QueryService::new(embedder.clone(), store.clone())?;

        let listener = TcpListener::bind(config.bind)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind))?;

        let ingestion: IngestionHandle = PipelineBuilder::new()
            .source(JsonlTailReader::new(config.data_file.clone()))
            .chunker(chunker)
            .embedder(embedder)
            .store(store)
            .config(config.pipeline)
            .build()?
            .spawn();

        Ok(Self {
            listener,
            state: Arc::new(AppState {
                query,
                ingestion,
                capabilities,
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Serve until `shutdown` resolves, then stop the ingestion loop
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ingestion = self.state.ingestion.clone();
        let app = http_api::router(self.state);
        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        ingestion.shutdown().await?;
        Ok(())
    }
}
