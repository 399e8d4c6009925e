mod api;
mod catalog;
mod config;
mod error;
mod evaluation;
mod filters;
mod model;
mod search;
mod server;
mod update;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use evaluation::RankingMode;
use recommender_common::embedding::Embedder;
use recommender_common::fetch::{PageFetcher, PageFetcherConfig};
use recommender_common::vectordb::VectorDb;
use search::RecommendationEngine;
use server::RecommenderServer;
use update::IndexService;

/// Assessment recommender: semantic search over an assessment catalog.
#[derive(Parser)]
#[command(name = "assessment-recommender")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the MCP tools over stdio, or TCP when MCP_TCP_LISTEN_ADDR is set (default)
    Serve,
    /// Rebuild the vector index from the catalog and exit
    Index,
    /// Score recommendations against the ground-truth test set and save the results
    Evaluate {
        /// Cutoffs to score at, comma separated
        #[arg(long = "k", value_delimiter = ',', default_values_t = [3usize, 5, 10])]
        k_values: Vec<usize>,

        /// Rank through the constraint-filtering pipeline
        #[arg(long)]
        auto_filter: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = Config::from_env()?;
    info!(
        lancedb_path = %config.lancedb_path,
        catalog = %config.catalog_path.display(),
        model = config.embedding_model.name(),
        "configuration loaded"
    );

    let records = catalog::load_or_seed(&config.catalog_path)?;
    info!(records = records.len(), "catalog loaded");

    info!("initializing embedding model (may download on first run)");
    let embedder = Arc::new(Embedder::new(config.embedding_model).await?);
    info!("embedding model ready");

    let vectordb = Arc::new(VectorDb::connect(&config.lancedb_path).await?);
    info!("lancedb connected");

    let engine = Arc::new(RecommendationEngine::new(
        Arc::clone(&embedder),
        Arc::clone(&vectordb),
    ));
    let index_service = Arc::new(IndexService::new(
        embedder,
        vectordb,
        config.manifest_path(),
    ));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Index => {
            let manifest = index_service.rebuild(&engine, &records).await?;
            info!(entries = manifest.entry_count, model = %manifest.model, "index rebuilt");
        }
        Command::Evaluate {
            k_values,
            auto_filter,
        } => {
            index_service.initialize(&engine, &records).await;
            let mode = if auto_filter {
                RankingMode::AutoFilter
            } else {
                RankingMode::Similarity
            };
            let test_data = evaluation::load_or_create_test_data(&config.test_data_path)?;
            let results = evaluation::evaluate(&engine, &test_data, &k_values, mode).await?;
            let path = results.save(&config.eval_output_dir)?;
            println!("{}", serde_json::to_string_pretty(&results.overall)?);
            info!(path = %path.display(), "evaluation finished");
        }
        Command::Serve => {
            index_service.initialize(&engine, &records).await;
            let fetcher = PageFetcher::new(PageFetcherConfig {
                timeout: config.fetch_timeout,
                ..Default::default()
            })?;
            let listen_addr = config.tcp_listen_addr.clone();
            let server = RecommenderServer::new(engine, index_service, fetcher, config);
            serve(server, listen_addr).await?;
        }
    }
    Ok(())
}

async fn serve(server: RecommenderServer, listen_addr: Option<String>) -> anyhow::Result<()> {
    if let Some(addr) = listen_addr {
        let listener = TcpListener::bind(&addr).await?;
        info!(listen_addr = %addr, "MCP server ready, serving on TCP");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = server.clone();
            tokio::spawn(async move {
                tracing::info!(peer = %peer, "MCP client connected");
                let service = server.serve(stream).await.inspect_err(|e| {
                    tracing::error!(error = %e, "MCP server error");
                })?;
                service.waiting().await?;
                tracing::info!(peer = %peer, "MCP client disconnected");
                Ok::<(), anyhow::Error>(())
            });
        }
    } else {
        info!("MCP server ready, serving on stdio");
        let service = server.serve(stdio()).await.inspect_err(|e| {
            tracing::error!(error = %e, "MCP server error");
        })?;
        service.waiting().await?;
        info!("MCP server shut down");
    }
    Ok(())
}
