use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use schema_rag_sql::catalog::{SchemaCatalog, SchemaSource};
use schema_rag_sql::config::AppConfig;
use schema_rag_sql::context::ServingContext;
use schema_rag_sql::execution::MssqlExecutor;
use schema_rag_sql::llm::OllamaClient;
use schema_rag_sql::orchestrator::QueryOrchestrator;
use schema_rag_sql::schema_rag::{IndexBuilder, IndexStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlrag")]
#[command(about = "Schema retrieval and SQL canonicalization for natural-language queries")]
struct Args {
    /// Schema catalog JSON (or set SCHEMA_CATALOG_PATH)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Index directory (or set SCHEMA_INDEX_DIR)
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed the catalog and publish a new index generation
    BuildIndex {
        /// Generations to keep on disk, including the new one
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Rank candidate tables for a query
    Retrieve {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Print one table's schema as JSON
    Schema { table: String },
    /// Canonicalize a SQL statement
    Standardize { sql: String },
    /// Answer a question end to end (needs DATABASE_URL and the generation service)
    Ask { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(catalog) = args.catalog {
        config.catalog_path = catalog;
    }
    if let Some(index_dir) = args.index_dir {
        config.index_dir = index_dir;
    }

    match args.command {
        Command::BuildIndex { keep } => {
            let catalog = SchemaCatalog::load(&config.catalog_path)?;
            let embedder = config.embedder()?;
            let store = IndexStore::new(&config.index_dir);
            let manifest = IndexBuilder::new(embedder.as_ref())
                .build_and_persist(&catalog, &store)
                .await?;
            let removed = store.prune(keep.unwrap_or(config.index_generations_kept))?;
            info!(removed = removed.len(), "Pruned old generations");
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        Command::Retrieve { query, k } => {
            let context = ServingContext::from_config(&config)?;
            let tables = context
                .retriever()?
                .rank(&query, k.unwrap_or(config.top_k))
                .await?;
            for table in tables {
                println!("{}", table.name);
            }
        }
        Command::Schema { table } => {
            let catalog = SchemaCatalog::load(&config.catalog_path)?;
            let descriptor = catalog.describe(&table)?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Command::Standardize { sql } => {
            println!("{}", config.canonicalizer()?.standardize(&sql));
        }
        Command::Ask { query } => {
            let database_url = config
                .database_url
                .clone()
                .context("DATABASE_URL must be set to answer queries")?;
            let context = Arc::new(ServingContext::from_config(&config)?);
            let orchestrator = QueryOrchestrator::new(
                context,
                Arc::new(OllamaClient::new(config.ollama_url.clone())),
                Arc::new(MssqlExecutor::connect(&database_url).await?),
            );
            let response = orchestrator.answer(&query).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
