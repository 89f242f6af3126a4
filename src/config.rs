//! Deployment configuration read from the environment (and `.env`).

use crate::error::{Result, SqlRagError};
use crate::llm::{DEFAULT_GENERATION_MODEL, DEFAULT_OLLAMA_URL};
use crate::relevance::{HeuristicRules, RelevanceMode, DEFAULT_MAX_COLUMNS};
use crate::schema_rag::embedder::{Embedder, HashingEmbedder, OpenAiEmbedder};
use crate::sql::Canonicalizer;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_HASHING_DIMENSION: usize = 384;
const DEFAULT_OPENAI_DIMENSION: usize = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingProvider {
    Hashing,
    OpenAi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceKind {
    Heuristic,
    Similarity,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub catalog_path: PathBuf,
    pub index_dir: PathBuf,
    pub priority_table: Option<String>,
    pub top_k: usize,
    pub relevance_kind: RelevanceKind,
    pub similarity_threshold: f32,
    pub max_relevant_columns: usize,
    pub column_rules_path: Option<PathBuf>,
    pub canonicalization_rules_path: Option<PathBuf>,
    pub deduplicate_rows: bool,
    pub summarize_results: bool,
    pub ollama_url: String,
    pub generation_model: String,
    pub embedding_provider: EmbeddingProvider,
    pub embedding_model: Option<String>,
    pub embedding_dimension: usize,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    /// SQL Server connection string, ADO.NET or JDBC form.
    pub database_url: Option<String>,
    pub server_addr: String,
    pub index_generations_kept: usize,
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key → value source. Unset and empty
    /// values fall back to defaults; unparsable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let relevance_kind = match or("COLUMN_RELEVANCE_MODE", "heuristic").to_lowercase().as_str() {
            "heuristic" => RelevanceKind::Heuristic,
            "similarity" => RelevanceKind::Similarity,
            other => {
                return Err(SqlRagError::Config(format!(
                    "COLUMN_RELEVANCE_MODE must be 'heuristic' or 'similarity', got '{}'",
                    other
                )))
            }
        };
        let embedding_provider = match or("EMBEDDING_PROVIDER", "hashing").to_lowercase().as_str() {
            "hashing" => EmbeddingProvider::Hashing,
            "openai" => EmbeddingProvider::OpenAi,
            other => {
                return Err(SqlRagError::Config(format!(
                    "EMBEDDING_PROVIDER must be 'hashing' or 'openai', got '{}'",
                    other
                )))
            }
        };

        // PRIORITY_TABLE set to an empty string disables the priority table.
        let priority_table = match lookup("PRIORITY_TABLE") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v.trim().to_string()),
            None => Some("IncidentLog_TBL".to_string()),
        };

        let config = Self {
            catalog_path: PathBuf::from(or("SCHEMA_CATALOG_PATH", "schema.json")),
            index_dir: PathBuf::from(or("SCHEMA_INDEX_DIR", "schema_index")),
            priority_table,
            top_k: parse(&get, "RETRIEVAL_TOP_K", 5)?,
            relevance_kind,
            similarity_threshold: parse(&get, "SIMILARITY_THRESHOLD", 0.3)?,
            max_relevant_columns: parse(&get, "MAX_RELEVANT_COLUMNS", DEFAULT_MAX_COLUMNS)?,
            column_rules_path: get("COLUMN_RULES_PATH").map(PathBuf::from),
            canonicalization_rules_path: get("CANONICALIZATION_RULES_PATH").map(PathBuf::from),
            deduplicate_rows: parse_flag(&get, "DEDUPLICATE_ROWS", false)?,
            summarize_results: parse_flag(&get, "SUMMARIZE_RESULTS", true)?,
            ollama_url: or("OLLAMA_URL", DEFAULT_OLLAMA_URL),
            generation_model: or("GENERATION_MODEL", DEFAULT_GENERATION_MODEL),
            embedding_provider,
            embedding_model: get("EMBEDDING_MODEL"),
            embedding_dimension: parse(
                &get,
                "EMBEDDING_DIMENSION",
                match embedding_provider {
                    EmbeddingProvider::Hashing => DEFAULT_HASHING_DIMENSION,
                    EmbeddingProvider::OpenAi => DEFAULT_OPENAI_DIMENSION,
                },
            )?,
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: or("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            database_url: get("DATABASE_URL"),
            server_addr: or("SERVER_ADDR", "0.0.0.0:8080"),
            index_generations_kept: parse(&get, "INDEX_GENERATIONS_KEPT", 2)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("RETRIEVAL_TOP_K", self.top_k),
            ("MAX_RELEVANT_COLUMNS", self.max_relevant_columns),
            ("EMBEDDING_DIMENSION", self.embedding_dimension),
            ("INDEX_GENERATIONS_KEPT", self.index_generations_kept),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SqlRagError::Config(format!("{} must be at least 1", key)));
            }
        }
        if !(-1.0..=1.0).contains(&self.similarity_threshold) {
            return Err(SqlRagError::Config(format!(
                "SIMILARITY_THRESHOLD must be within [-1, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }

    pub fn relevance_mode(&self) -> Result<RelevanceMode> {
        Ok(match self.relevance_kind {
            RelevanceKind::Similarity => RelevanceMode::Similarity {
                threshold: self.similarity_threshold,
            },
            RelevanceKind::Heuristic => RelevanceMode::Heuristic(match &self.column_rules_path {
                Some(path) => HeuristicRules::load(path)?,
                None => HeuristicRules::default(),
            }),
        })
    }

    pub fn canonicalizer(&self) -> Result<Canonicalizer> {
        match &self.canonicalization_rules_path {
            Some(path) => Canonicalizer::with_rules_file(path),
            None => Ok(Canonicalizer::default()),
        }
    }

    pub fn embedder(&self) -> Result<Box<dyn Embedder>> {
        match self.embedding_provider {
            EmbeddingProvider::Hashing => {
                Ok(Box::new(HashingEmbedder::new(self.embedding_dimension)))
            }
            EmbeddingProvider::OpenAi => {
                let api_key = self.openai_api_key.clone().ok_or_else(|| {
                    SqlRagError::Config(
                        "OPENAI_API_KEY is required when EMBEDDING_PROVIDER=openai".to_string(),
                    )
                })?;
                Ok(Box::new(OpenAiEmbedder::new(
                    api_key,
                    self.openai_base_url.clone(),
                    self.embedding_model
                        .clone()
                        .unwrap_or_else(|| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string()),
                    self.embedding_dimension,
                )))
            }
        }
    }
}

fn parse<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| SqlRagError::Config(format!("Invalid {} '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SqlRagError::Config(format!(
                "Invalid {} '{}': expected true or false",
                key, v
            ))),
        },
    }
}
