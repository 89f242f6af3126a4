//! Immutable state shared by every request.

use crate::catalog::SchemaCatalog;
use crate::config::AppConfig;
use crate::error::{Result, SqlRagError};
use crate::relevance::{ColumnRelevanceScorer, RelevanceMode};
use crate::schema_rag::embedder::Embedder;
use crate::schema_rag::retriever::SchemaRetriever;
use crate::schema_rag::vector_store::{IndexStore, PersistedIndex};
use crate::sql::Canonicalizer;
use tracing::info;

/// Request-independent knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub top_k: usize,
    pub priority_table: Option<String>,
    pub max_columns: usize,
    pub generation_model: String,
    pub deduplicate_rows: bool,
    pub summarize_results: bool,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            top_k: config.top_k,
            priority_table: config.priority_table.clone(),
            max_columns: config.max_relevant_columns,
            generation_model: config.generation_model.clone(),
            deduplicate_rows: config.deduplicate_rows,
            summarize_results: config.summarize_results,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            priority_table: Some("IncidentLog_TBL".to_string()),
            max_columns: crate::relevance::DEFAULT_MAX_COLUMNS,
            generation_model: crate::llm::DEFAULT_GENERATION_MODEL.to_string(),
            deduplicate_rows: false,
            summarize_results: true,
        }
    }
}

/// Built once at startup and never mutated.
pub struct ServingContext {
    pub catalog: SchemaCatalog,
    pub index: PersistedIndex,
    pub embedder: Box<dyn Embedder>,
    pub canonicalizer: Canonicalizer,
    pub relevance: RelevanceMode,
    pub options: PipelineOptions,
}

impl ServingContext {
    /// Refuses an index built with a different embedder than the one that
    /// will query it.
    pub fn new(
        catalog: SchemaCatalog,
        index: PersistedIndex,
        embedder: Box<dyn Embedder>,
        canonicalizer: Canonicalizer,
        relevance: RelevanceMode,
        options: PipelineOptions,
    ) -> Result<Self> {
        let manifest = &index.manifest;
        if manifest.embedding_model != embedder.model_id() {
            return Err(SqlRagError::Index(format!(
                "Index {} was built with '{}', query embedder is '{}'",
                manifest.generation,
                manifest.embedding_model,
                embedder.model_id()
            )));
        }
        if manifest.dimension != embedder.dimension() {
            return Err(SqlRagError::Index(format!(
                "Index {} has dimension {}, query embedder produces {}",
                manifest.generation,
                manifest.dimension,
                embedder.dimension()
            )));
        }
        Ok(Self {
            catalog,
            index,
            embedder,
            canonicalizer,
            relevance,
            options,
        })
    }

    /// Loads catalog, current index generation and rule sets named by `config`.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let catalog = SchemaCatalog::load(&config.catalog_path)?;
        let index = IndexStore::new(&config.index_dir).load()?;
        info!(
            tables = catalog.len(),
            generation = %index.manifest.generation,
            records = index.manifest.records,
            "Serving context loaded"
        );
        Self::new(
            catalog,
            index,
            config.embedder()?,
            config.canonicalizer()?,
            config.relevance_mode()?,
            PipelineOptions::from_config(config),
        )
    }

    pub fn retriever(&self) -> Result<SchemaRetriever<'_>> {
        SchemaRetriever::new(
            &self.catalog,
            &self.index.index,
            self.embedder.as_ref(),
            self.options.priority_table.as_deref(),
        )
    }

    pub fn scorer(&self) -> ColumnRelevanceScorer<'_> {
        ColumnRelevanceScorer::new(
            &self.relevance,
            self.embedder.as_ref(),
            Some(&self.index.index),
            self.options.max_columns,
        )
    }
}
