//! Query Orchestrator
//!
//! Natural-language question in, aggregated rows (and optionally a summary)
//! out. Candidate tables are handled one at a time; a failure on one
//! candidate is logged and skipped so the others still contribute.

use crate::catalog::TableDescriptor;
use crate::context::ServingContext;
use crate::error::{Result, SqlRagError};
use crate::execution::{Row, SqlExecutor, SqlSession};
use crate::llm::{sql_prompt, summary_prompt, GenerationRequest, TextGenerationService};
use crate::relevance::{ColumnRelevanceScorer, ScoringQuery};
use crate::sql::statement_from_response;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const NO_RESULTS: &str = "No results found for your query.";
pub const NO_RELEVANT_SCHEMA: &str = "No relevant table found.";
pub const SUMMARY_UNAVAILABLE: &str = "Summary unavailable.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Answered {
        query: String,
        sql: Vec<String>,
        data: Vec<Row>,
        #[serde(skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    NoResults {
        query: String,
        sql: Vec<String>,
        response: String,
    },
    NoRelevantSchema {
        query: String,
        response: String,
    },
}

impl QueryResponse {
    pub fn sql(&self) -> &[String] {
        match self {
            QueryResponse::Answered { sql, .. } | QueryResponse::NoResults { sql, .. } => sql,
            QueryResponse::NoRelevantSchema { .. } => &[],
        }
    }

    pub fn data(&self) -> &[Row] {
        match self {
            QueryResponse::Answered { data, .. } => data,
            _ => &[],
        }
    }
}

/// What one candidate contributed, if anything.
enum CandidateOutcome {
    Executed { sql: String, rows: Vec<Row> },
    Skipped,
}

pub struct QueryOrchestrator {
    context: Arc<ServingContext>,
    generator: Arc<dyn TextGenerationService>,
    executor: Arc<dyn SqlExecutor>,
}

impl QueryOrchestrator {
    pub fn new(
        context: Arc<ServingContext>,
        generator: Arc<dyn TextGenerationService>,
        executor: Arc<dyn SqlExecutor>,
    ) -> Self {
        Self {
            context,
            generator,
            executor,
        }
    }

    pub fn context(&self) -> &ServingContext {
        &self.context
    }

    pub async fn answer(&self, query: &str) -> Result<QueryResponse> {
        let request_id = Uuid::new_v4();
        let span = info_span!("query", %request_id);
        self.answer_inner(query).instrument(span).await
    }

    async fn answer_inner(&self, query: &str) -> Result<QueryResponse> {
        let ctx = &*self.context;
        let candidates = ctx.retriever()?.rank(query, ctx.options.top_k).await?;
        info!(
            query,
            candidates = ?candidates.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "Retrieved candidate tables"
        );
        if candidates.is_empty() {
            return Ok(QueryResponse::NoRelevantSchema {
                query: query.to_string(),
                response: NO_RELEVANT_SCHEMA.to_string(),
            });
        }

        let scorer = ctx.scorer();
        let prepared = scorer.prepare(query).await?;
        let sole_candidate = candidates.len() == 1;
        let mut session = self.executor.session().await?;

        let mut statements = Vec::new();
        let mut data = Vec::new();
        for table in candidates {
            let outcome = self
                .run_candidate(&scorer, &prepared, table, session.as_mut())
                .await;
            match outcome {
                Ok(CandidateOutcome::Executed { sql, rows }) => {
                    statements.push(sql);
                    data.extend(rows);
                }
                Ok(CandidateOutcome::Skipped) => {}
                Err(e @ SqlRagError::Generation(_)) if sole_candidate => return Err(e),
                Err(e) => {
                    warn!(table = %table.name, error = %e, "Skipping candidate");
                }
            }
        }

        if ctx.options.deduplicate_rows {
            let before = data.len();
            data = data
                .into_iter()
                .unique_by(|row| Value::Object(row.clone()).to_string())
                .collect();
            debug!(before, after = data.len(), "Deduplicated rows");
        }

        if data.is_empty() {
            return Ok(QueryResponse::NoResults {
                query: query.to_string(),
                sql: statements,
                response: NO_RESULTS.to_string(),
            });
        }

        let explanation = if ctx.options.summarize_results {
            Some(self.summarize(&data).await)
        } else {
            None
        };
        info!(statements = statements.len(), rows = data.len(), "Query answered");

        Ok(QueryResponse::Answered {
            query: query.to_string(),
            sql: statements,
            data,
            explanation,
        })
    }

    async fn run_candidate(
        &self,
        scorer: &ColumnRelevanceScorer<'_>,
        prepared: &ScoringQuery,
        table: &TableDescriptor,
        session: &mut dyn SqlSession,
    ) -> Result<CandidateOutcome> {
        let ctx = &*self.context;
        let columns = scorer.relevant_columns(prepared, table).await?;
        if columns.is_empty() {
            debug!(table = %table.name, "No relevant columns, dropping candidate");
            return Ok(CandidateOutcome::Skipped);
        }

        let request = GenerationRequest::sql(
            &ctx.options.generation_model,
            sql_prompt(&prepared.text, table, &columns),
        );
        let raw = self.generator.generate(&request).await?;
        let statement = statement_from_response(&raw);
        if statement.is_empty() {
            return Err(SqlRagError::Generation(format!(
                "Empty statement generated for {}",
                table.name
            )));
        }
        let sql = ctx.canonicalizer.standardize(statement);
        debug!(table = %table.name, %sql, "Canonicalized statement");

        match session.execute(&sql).await {
            Ok(rows) => {
                debug!(table = %table.name, rows = rows.len(), "Candidate executed");
                Ok(CandidateOutcome::Executed { sql, rows })
            }
            Err(e) => {
                if let Err(rollback) = session.rollback().await {
                    warn!(table = %table.name, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn summarize(&self, rows: &[Row]) -> String {
        let request = GenerationRequest::plain(
            &self.context.options.generation_model,
            summary_prompt(rows),
        );
        match self.generator.generate(&request).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Summary generation failed");
                SUMMARY_UNAVAILABLE.to_string()
            }
        }
    }
}
