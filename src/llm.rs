//! Text generation client and prompt construction.

use crate::catalog::TableDescriptor;
use crate::error::{Result, SqlRagError};
use crate::execution::Row;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11500";
pub const DEFAULT_GENERATION_MODEL: &str = "sql_gen";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    pub stream: bool,
}

impl GenerationRequest {
    /// Deterministic decoding for SQL generation.
    pub fn sql(model: &str, prompt: String) -> Self {
        Self {
            model: model.to_string(),
            prompt,
            temperature: Some(0.0),
            top_p: Some(1.0),
            repetition_penalty: Some(1.2),
            stream: false,
        }
    }

    /// Server-side default decoding, used for summaries.
    pub fn plain(model: &str, prompt: String) -> Self {
        Self {
            model: model.to_string(),
            prompt,
            temperature: None,
            top_p: None,
            repetition_penalty: None,
            stream: false,
        }
    }
}

#[async_trait]
pub trait TextGenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    #[serde(default)]
    response: String,
}

/// Client for an Ollama-style `/api/generate` endpoint.
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TextGenerationService for OllamaClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %request.model, prompt_len = request.prompt.len(), "Calling generation service");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SqlRagError::Generation(format!("Generation call failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SqlRagError::Generation(format!(
                "Generation service returned {}: {}",
                status, body
            )));
        }

        let parsed: OllamaGenerateResponse = response.json().await.map_err(|e| {
            SqlRagError::Generation(format!("Failed to parse generation response: {}", e))
        })?;
        Ok(parsed.response.trim().to_string())
    }
}

fn nullability(nullable: bool) -> &'static str {
    if nullable {
        "NULL"
    } else {
        "NOT NULL"
    }
}

/// Generation prompt restricted to `columns` of `table`, in the given order.
/// Names the table does not have are left out.
pub fn sql_prompt(query: &str, table: &TableDescriptor, columns: &[String]) -> String {
    let column_lines: Vec<String> = columns
        .iter()
        .filter_map(|name| table.column(name))
        .map(|c| format!("- {} ({}, {})", c.name, c.data_type, nullability(c.nullable)))
        .collect();

    format!(
        "You are a SQL code generator. Output ONLY valid SQL code with no explanations.\n\n\
         Request: Convert this into MSSQL: {}\n\n\
         Table Schema:\n\
         Table: {}\n\
         Columns:\n\
         {}\n\n\
         SQL:",
        query,
        table.name,
        column_lines.join("\n")
    )
}

pub fn summary_prompt(rows: &[Row]) -> String {
    let rendered = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
    format!(
        "Convert the following SQL output into a natural language response that a non-technical person would understand: {}",
        rendered
    )
}
