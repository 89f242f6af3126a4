//! Column relevance scoring.
//!
//! Narrows a candidate table to the columns worth showing the generator,
//! either by embedding similarity or by per-table heuristic rules driven by
//! the query's aspects.

use crate::catalog::TableDescriptor;
use crate::error::{Result, SqlRagError};
use crate::relevance::aspects::{Aspect, QueryAspects};
use crate::schema_rag::embedder::{cosine_similarity, Embedder, Embedding};
use crate::schema_rag::index_builder::describe_column;
use crate::schema_rag::vector_store::FlatL2Index;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_MAX_COLUMNS: usize = 8;

/// How a rule picks columns from a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSelector {
    /// A named column, ignored if the table does not have it.
    Column { name: String },
    /// Columns whose lowercased name contains any keyword, in table order,
    /// at most `limit` of them.
    Keywords { keywords: Vec<String>, limit: usize },
    /// `column` when the raw query mentions `term`.
    QueryMention { term: String, column: String },
}

/// A selector gated on an aspect; no aspect means it always fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRule {
    #[serde(default)]
    pub when: Option<Aspect>,
    #[serde(flatten)]
    pub selector: ColumnSelector,
}

impl SelectorRule {
    pub fn always(selector: ColumnSelector) -> Self {
        Self { when: None, selector }
    }

    pub fn on(aspect: Aspect, selector: ColumnSelector) -> Self {
        Self {
            when: Some(aspect),
            selector,
        }
    }

    fn apply(&self, query_lower: &str, aspects: &QueryAspects, table: &TableDescriptor) -> Vec<String> {
        if let Some(aspect) = self.when {
            if !aspects.has(aspect) {
                return Vec::new();
            }
        }
        match &self.selector {
            ColumnSelector::Column { name } => table
                .column(name)
                .map(|c| vec![c.name.clone()])
                .unwrap_or_default(),
            ColumnSelector::Keywords { keywords, limit } => {
                // Rule files may spell keywords in any case.
                let keywords: Vec<String> = keywords.iter().map(|kw| kw.to_lowercase()).collect();
                table
                    .columns
                    .iter()
                    .filter(|c| {
                        let lowered = c.name.to_lowercase();
                        keywords.iter().any(|kw| lowered.contains(kw.as_str()))
                    })
                    .take(*limit)
                    .map(|c| c.name.clone())
                    .collect()
            }
            ColumnSelector::QueryMention { term, column } => {
                if query_lower.contains(&term.to_lowercase()) && table.column(column).is_some() {
                    vec![column.clone()]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

fn keywords(words: &[&str], limit: usize) -> ColumnSelector {
    ColumnSelector::Keywords {
        keywords: words.iter().map(|w| w.to_string()).collect(),
        limit,
    }
}

fn column(name: &str) -> ColumnSelector {
    ColumnSelector::Column {
        name: name.to_string(),
    }
}

fn mention(term: &str, column: &str) -> ColumnSelector {
    ColumnSelector::QueryMention {
        term: term.to_string(),
        column: column.to_string(),
    }
}

/// Table name → ordered rules, plus the rules for tables not listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeuristicRules {
    #[serde(default)]
    pub tables: HashMap<String, Vec<SelectorRule>>,
    #[serde(default = "HeuristicRules::default_fallback")]
    pub fallback: Vec<SelectorRule>,
}

impl HeuristicRules {
    fn default_fallback() -> Vec<SelectorRule> {
        vec![SelectorRule::always(keywords(&["name", "desc", "title"], 1))]
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SqlRagError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SqlRagError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    fn rules_for(&self, table: &str) -> &[SelectorRule] {
        self.tables
            .get(table)
            .map(|rules| rules.as_slice())
            .unwrap_or(&self.fallback)
    }

    /// The incident-management deployment's rules.
    pub fn incident_management() -> Self {
        let mut tables = HashMap::new();
        tables.insert(
            "IncidentLog_TBL".to_string(),
            vec![
                SelectorRule::on(Aspect::Status, column("inlStatus_FRK")),
                SelectorRule::on(
                    Aspect::Location,
                    keywords(
                        &["building", "zone", "street", "location", "address", "area", "site", "map"],
                        3,
                    ),
                ),
                SelectorRule::on(Aspect::Category, column("inlCategory_FRK")),
                SelectorRule::on(Aspect::Category, mention("subcategory", "inlSubCategory_FRK")),
                SelectorRule::on(Aspect::Time, keywords(&["time", "date"], 2)),
                SelectorRule::on(Aspect::Count, mention("building", "inlBuilding_FRK")),
                SelectorRule::on(Aspect::Count, mention("status", "inlStatus_FRK")),
                SelectorRule::on(Aspect::Count, mention("category", "inlCategory_FRK")),
            ],
        );
        tables.insert(
            "IncidentStatus_TBL".to_string(),
            vec![SelectorRule::always(keywords(&["name", "desc", "title", "text"], 1))],
        );
        tables.insert(
            "Building_TBL".to_string(),
            vec![SelectorRule::always(keywords(&["name", "address", "location"], 2))],
        );
        tables.insert(
            "IncidentCategory_TBL".to_string(),
            vec![SelectorRule::always(keywords(&["name"], 1))],
        );
        Self {
            tables,
            fallback: Self::default_fallback(),
        }
    }
}

impl Default for HeuristicRules {
    fn default() -> Self {
        Self::incident_management()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelevanceMode {
    Similarity { threshold: f32 },
    Heuristic(HeuristicRules),
}

/// Per-query state shared across all candidates of one request.
#[derive(Debug, Clone)]
pub struct ScoringQuery {
    pub text: String,
    pub lowered: String,
    pub aspects: QueryAspects,
    pub embedding: Option<Embedding>,
}

pub struct ColumnRelevanceScorer<'a> {
    mode: &'a RelevanceMode,
    embedder: &'a dyn Embedder,
    index: Option<&'a FlatL2Index>,
    max_columns: usize,
}

impl<'a> ColumnRelevanceScorer<'a> {
    pub fn new(
        mode: &'a RelevanceMode,
        embedder: &'a dyn Embedder,
        index: Option<&'a FlatL2Index>,
        max_columns: usize,
    ) -> Self {
        Self {
            mode,
            embedder,
            index,
            max_columns,
        }
    }

    /// Detects aspects and, in similarity mode, embeds the query once.
    pub async fn prepare(&self, query: &str) -> Result<ScoringQuery> {
        let embedding = match self.mode {
            RelevanceMode::Similarity { .. } => Some(self.embedder.embed(query).await?),
            RelevanceMode::Heuristic(_) => None,
        };
        Ok(ScoringQuery {
            text: query.to_string(),
            lowered: query.to_lowercase(),
            aspects: QueryAspects::detect(query),
            embedding,
        })
    }

    /// Relevant column names, deduplicated in first-seen order and capped.
    /// An empty result means the table should be dropped for this query.
    pub async fn relevant_columns(
        &self,
        query: &ScoringQuery,
        table: &TableDescriptor,
    ) -> Result<Vec<String>> {
        let selected = match self.mode {
            RelevanceMode::Heuristic(rules) => self.heuristic(rules, query, table),
            RelevanceMode::Similarity { threshold } => {
                self.by_similarity(*threshold, query, table).await?
            }
        };
        Ok(selected
            .into_iter()
            .unique()
            .take(self.max_columns)
            .collect())
    }

    fn heuristic(
        &self,
        rules: &HeuristicRules,
        query: &ScoringQuery,
        table: &TableDescriptor,
    ) -> Vec<String> {
        let mut selected = Vec::new();
        if let Some(pk) = table.primary_key_column() {
            selected.push(pk.to_string());
        }
        for rule in rules.rules_for(&table.name) {
            selected.extend(rule.apply(&query.lowered, &query.aspects, table));
        }
        selected
    }

    async fn by_similarity(
        &self,
        threshold: f32,
        query: &ScoringQuery,
        table: &TableDescriptor,
    ) -> Result<Vec<String>> {
        let query_embedding = match &query.embedding {
            Some(embedding) => embedding.clone(),
            None => self.embedder.embed(&query.text).await?,
        };

        let mut scored: Vec<(usize, f32)> = Vec::with_capacity(table.columns.len());
        for (pos, column) in table.columns.iter().enumerate() {
            let stored = self
                .index
                .and_then(|index| index.column_vector(&table.name, &column.name));
            let score = match stored {
                Some(vector) => cosine_similarity(&query_embedding, vector),
                None => {
                    let vector = self.embedder.embed(&describe_column(&table.name, column)).await?;
                    cosine_similarity(&query_embedding, &vector)
                }
            };
            if score >= threshold {
                scored.push((pos, score));
            }
        }
        // Stable sort keeps table order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .map(|(pos, _)| table.columns[pos].name.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDescriptor;
    use crate::schema_rag::embedder::HashingEmbedder;

    fn incident_log() -> TableDescriptor {
        let cols = [
            ("inlIncident_PRK", "INTEGER"),
            ("inlStatus_FRK", "INTEGER"),
            ("inlCategory_FRK", "INTEGER"),
            ("inlSubCategory_FRK", "INTEGER"),
            ("inlBuilding_FRK", "INTEGER"),
            ("inlZone", "NVARCHAR"),
            ("inlStreetAddress", "NVARCHAR"),
            ("inlSiteMap", "NVARCHAR"),
            ("inlArea", "NVARCHAR"),
            ("inlReportedTime", "DATETIME"),
            ("inlCreatedDate", "DATETIME"),
            ("inlClosedDate", "DATETIME"),
        ];
        TableDescriptor::new(
            "IncidentLog_TBL",
            cols.iter()
                .map(|(n, t)| ColumnDescriptor::new(*n, *t, true))
                .collect(),
        )
        .with_primary_key(&["inlIncident_PRK"])
    }

    async fn heuristic_columns(query: &str, table: &TableDescriptor) -> Vec<String> {
        let mode = RelevanceMode::Heuristic(HeuristicRules::incident_management());
        let embedder = HashingEmbedder::new(8);
        let scorer = ColumnRelevanceScorer::new(&mode, &embedder, None, DEFAULT_MAX_COLUMNS);
        let prepared = scorer.prepare(query).await.unwrap();
        scorer.relevant_columns(&prepared, table).await.unwrap()
    }

    #[tokio::test]
    async fn test_location_and_time_caps() {
        let columns = heuristic_columns(
            "list incidents in building A from the last 7 days",
            &incident_log(),
        )
        .await;
        assert_eq!(
            columns,
            vec![
                "inlIncident_PRK",
                "inlBuilding_FRK",
                "inlZone",
                "inlStreetAddress",
                "inlReportedTime",
                "inlCreatedDate",
            ]
        );
    }

    #[tokio::test]
    async fn test_count_status_dedupes() {
        let columns = heuristic_columns("how many incidents have status open", &incident_log()).await;
        assert_eq!(columns, vec!["inlIncident_PRK", "inlStatus_FRK"]);
    }

    #[tokio::test]
    async fn test_subcategory_mention() {
        let columns =
            heuristic_columns("show incidents by category and subcategory", &incident_log()).await;
        assert_eq!(
            columns,
            vec!["inlIncident_PRK", "inlCategory_FRK", "inlSubCategory_FRK"]
        );
    }

    #[tokio::test]
    async fn test_cap_at_max_columns() {
        let columns = heuristic_columns(
            "count incidents by status, category, subcategory and building over time",
            &incident_log(),
        )
        .await;
        assert_eq!(columns.len(), DEFAULT_MAX_COLUMNS);
        assert_eq!(columns[0], "inlIncident_PRK");
    }

    #[tokio::test]
    async fn test_always_rules_and_fallback() {
        let status = TableDescriptor::new(
            "IncidentStatus_TBL",
            vec![
                ColumnDescriptor::new("insStatus_PRK", "INTEGER", false),
                ColumnDescriptor::new("insDescription", "NVARCHAR", true),
                ColumnDescriptor::new("insName", "NVARCHAR", true),
            ],
        );
        assert_eq!(
            heuristic_columns("anything", &status).await,
            vec!["insStatus_PRK", "insDescription"]
        );

        let unknown = TableDescriptor::new(
            "Unit_TBL",
            vec![
                ColumnDescriptor::new("untCode", "NVARCHAR", true),
                ColumnDescriptor::new("untTitle", "NVARCHAR", true),
                ColumnDescriptor::new("untName", "NVARCHAR", true),
            ],
        );
        assert_eq!(heuristic_columns("anything", &unknown).await, vec!["untTitle"]);
    }

    #[tokio::test]
    async fn test_table_without_relevant_columns_is_empty() {
        let bare = TableDescriptor::new(
            "Lookup_TBL",
            vec![ColumnDescriptor::new("code", "NVARCHAR", true)],
        );
        assert!(heuristic_columns("list everything", &bare).await.is_empty());
    }

    #[tokio::test]
    async fn test_similarity_mode_threshold() {
        let table = TableDescriptor::new(
            "Building_TBL",
            vec![
                ColumnDescriptor::new("bldBuilding_PRK", "INTEGER", false),
                ColumnDescriptor::new("bldName", "NVARCHAR", true),
                ColumnDescriptor::new("bldPhone", "NVARCHAR", true),
            ],
        );
        let embedder = HashingEmbedder::new(256);

        let mode = RelevanceMode::Similarity { threshold: 0.0 };
        let scorer = ColumnRelevanceScorer::new(&mode, &embedder, None, DEFAULT_MAX_COLUMNS);
        let prepared = scorer.prepare("building name").await.unwrap();
        assert!(prepared.embedding.is_some());
        let all = scorer.relevant_columns(&prepared, &table).await.unwrap();
        assert_eq!(all.len(), 3);

        let strict = RelevanceMode::Similarity { threshold: 1.01 };
        let scorer = ColumnRelevanceScorer::new(&strict, &embedder, None, DEFAULT_MAX_COLUMNS);
        let prepared = scorer.prepare("building name").await.unwrap();
        assert!(scorer.relevant_columns(&prepared, &table).await.unwrap().is_empty());
    }

    #[test]
    fn test_rules_deserialize_from_json() {
        let rules: HeuristicRules = serde_json::from_str(
            r#"{
                "tables": {
                    "Work_TBL": [
                        {"when": "time", "kind": "keywords", "keywords": ["due"], "limit": 1},
                        {"kind": "column", "name": "wrkOwner"}
                    ]
                }
            }"#,
        )
        .unwrap();
        let work = &rules.tables["Work_TBL"];
        assert_eq!(work[0].when, Some(Aspect::Time));
        assert_eq!(work[1], SelectorRule::always(column("wrkOwner")));
        assert_eq!(rules.fallback, HeuristicRules::default_fallback());
    }

    #[tokio::test]
    async fn test_rule_file_keywords_match_any_case() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            br#"{
                "tables": {
                    "Work_TBL": [
                        {"kind": "keywords", "keywords": ["Due"], "limit": 1},
                        {"kind": "query_mention", "term": "Owner", "column": "wrkOwner"}
                    ]
                }
            }"#,
        )
        .unwrap();
        let rules = HeuristicRules::load(file.path()).unwrap();

        let work = TableDescriptor::new(
            "Work_TBL",
            vec![
                ColumnDescriptor::new("wrkTitle", "NVARCHAR", true),
                ColumnDescriptor::new("wrkDueDate", "DATETIME", true),
                ColumnDescriptor::new("wrkOwner", "NVARCHAR", true),
            ],
        );
        let mode = RelevanceMode::Heuristic(rules);
        let embedder = HashingEmbedder::new(8);
        let scorer = ColumnRelevanceScorer::new(&mode, &embedder, None, DEFAULT_MAX_COLUMNS);
        let prepared = scorer.prepare("who is the owner of open work").await.unwrap();
        assert_eq!(
            scorer.relevant_columns(&prepared, &work).await.unwrap(),
            vec!["wrkDueDate", "wrkOwner"]
        );
    }
}
