use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use project_trainer::agents::{InBodyExtractor, Pipeline, PipelineOptions};
use project_trainer::config::Config;
use project_trainer::embeddings::KnowledgeIndex;
use project_trainer::llm::{embedder_from_config, LLM};
use project_trainer::retrieval::RetrievalService;
use project_trainer::{create_router, utils, AppState};

#[derive(Parser)]
#[command(
    name = "project-trainer",
    about = "InBody analysis and training plan API",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API (default).
    Serve,
    /// Build the knowledge index from the markdown corpus and exit.
    Index {
        /// Discard the stored collection and embed the corpus again.
        #[arg(long)]
        rebuild: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_logger();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        embeddings = %config.embeddings.provider,
        "Configuration loaded"
    );

    let embedder = embedder_from_config(&config.embeddings, &config.llm)
        .context("Failed to create embedding service")?;
    let index = Arc::new(
        KnowledgeIndex::open(config.knowledge.clone(), embedder, config.embeddings.batch_size)
            .await
            .context("Failed to open knowledge index")?,
    );

    match cli.command.unwrap_or(Command::Serve) {
        Command::Index { rebuild } => {
            let documents = if rebuild {
                index.rebuild().await?
            } else {
                index.ensure_built().await?
            };
            info!(documents, "Knowledge index ready");
            Ok(())
        }
        Command::Serve => serve(config, index).await,
    }
}

async fn serve(config: Config, index: Arc<KnowledgeIndex>) -> anyhow::Result<()> {
    if !config.knowledge.corpus_path.exists() && index.is_empty().await {
        warn!(
            path = %config.knowledge.corpus_path.display(),
            "Knowledge corpus not found; retrieval calls will fail until it exists"
        );
    }

    let llm = LLM::from_config(&config.llm).context("Failed to create LLM client")?;
    let retrieval = Arc::new(RetrievalService::new(index));
    let pipeline = Pipeline::new(llm.clone(), retrieval, PipelineOptions::from_config(&config))?;

    let state = AppState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
        extractor: Arc::new(InBodyExtractor::new(llm)),
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
