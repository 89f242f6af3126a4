//! Schema RAG Retriever
//!
//! Ranks catalog tables for a natural-language query using vector search over
//! the schema index.

use crate::catalog::{SchemaCatalog, TableDescriptor};
use crate::error::{Result, SqlRagError};
use crate::schema_rag::embedder::Embedder;
use crate::schema_rag::vector_store::FlatL2Index;
use itertools::Itertools;
use tracing::{debug, warn};

/// Moves `priority` to the front if present; everything else keeps its order.
pub fn apply_priority<'a>(tables: Vec<&'a str>, priority: Option<&str>) -> Vec<&'a str> {
    let Some(priority) = priority else {
        return tables;
    };
    let (mut front, rest): (Vec<&str>, Vec<&str>) =
        tables.into_iter().partition(|t| *t == priority);
    front.truncate(1);
    front.extend(rest);
    front
}

pub struct SchemaRetriever<'a> {
    catalog: &'a SchemaCatalog,
    index: &'a FlatL2Index,
    embedder: &'a dyn Embedder,
    priority_table: Option<&'a str>,
}

impl<'a> SchemaRetriever<'a> {
    pub fn new(
        catalog: &'a SchemaCatalog,
        index: &'a FlatL2Index,
        embedder: &'a dyn Embedder,
        priority_table: Option<&'a str>,
    ) -> Result<Self> {
        if embedder.dimension() != index.dimension() {
            return Err(SqlRagError::Index(format!(
                "Embedder {} produces {} dimensions, index has {}",
                embedder.model_id(),
                embedder.dimension(),
                index.dimension()
            )));
        }
        Ok(Self {
            catalog,
            index,
            embedder,
            priority_table,
        })
    }

    /// Up to `k` tables, nearest first, with the priority table bubbled up.
    pub async fn rank(&self, query: &str, k: usize) -> Result<Vec<&'a TableDescriptor>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;
        let index: &'a FlatL2Index = self.index;
        let hits = index.search(&query_embedding, k)?;

        let raw_tables: Vec<&'a str> = hits
            .iter()
            .map(|hit| hit.record.table.as_str())
            .unique()
            .collect();
        debug!(query, candidates = ?raw_tables, "Nearest schema records");

        let ordered = apply_priority(raw_tables, self.priority_table);

        let mut tables = Vec::with_capacity(ordered.len());
        for name in ordered.into_iter().take(k) {
            match self.catalog.get(name) {
                Some(table) => tables.push(table),
                None => warn!(table = name, "Indexed table is missing from the catalog"),
            }
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDescriptor;
    use crate::schema_rag::embedder::HashingEmbedder;
    use crate::schema_rag::vector_store::EmbeddingRecord;

    #[test]
    fn test_priority_moves_to_front() {
        let ranked = apply_priority(vec!["a", "b", "p", "c"], Some("p"));
        assert_eq!(ranked, vec!["p", "a", "b", "c"]);
    }

    #[test]
    fn test_priority_absent_or_unset() {
        assert_eq!(apply_priority(vec!["a", "b"], Some("p")), vec!["a", "b"]);
        assert_eq!(apply_priority(vec!["b", "a"], None), vec!["b", "a"]);
        assert!(apply_priority(vec![], Some("p")).is_empty());
    }

    fn table(name: &str) -> TableDescriptor {
        TableDescriptor::new(name, vec![ColumnDescriptor::new("id", "INT", false)])
    }

    fn record(id: usize, table: &str, column: Option<&str>) -> EmbeddingRecord {
        EmbeddingRecord {
            embedding_id: id,
            table: table.to_string(),
            column: column.map(|c| c.to_string()),
            description: String::new(),
        }
    }

    /// 1-d index queried through an embedder whose output is a fixed point,
    /// so distances are fully controlled by the test.
    struct FixedEmbedder(Vec<f32>);

    #[async_trait::async_trait]
    impl Embedder for FixedEmbedder {
        fn model_id(&self) -> &str {
            "fixed"
        }
        fn dimension(&self) -> usize {
            self.0.len()
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn fixture() -> (SchemaCatalog, FlatL2Index) {
        let catalog =
            SchemaCatalog::new(vec![table("a"), table("b"), table("p"), table("c")]).unwrap();
        let index = FlatL2Index::new(
            1,
            vec![
                record(0, "a", None),
                record(1, "a", Some("id")),
                record(2, "b", None),
                record(3, "p", None),
                record(4, "c", None),
                record(5, "ghost", None),
            ],
            vec![vec![0.0], vec![0.1], vec![0.2], vec![0.3], vec![0.4], vec![0.05]],
        )
        .unwrap();
        (catalog, index)
    }

    fn names(tables: &[&TableDescriptor]) -> Vec<String> {
        tables.iter().map(|t| t.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_rank_dedupes_and_bubbles_priority() {
        let (catalog, index) = fixture();
        let embedder = FixedEmbedder(vec![0.0]);
        let retriever = SchemaRetriever::new(&catalog, &index, &embedder, Some("p")).unwrap();

        // raw order: a(0), ghost(5), a(1), b(2), p(3)
        let ranked = retriever.rank("anything", 5).await.unwrap();
        assert_eq!(names(&ranked), vec!["p", "a", "b"]);
    }

    #[tokio::test]
    async fn test_priority_outside_raw_results_is_not_added() {
        let (catalog, index) = fixture();
        let embedder = FixedEmbedder(vec![0.0]);
        let retriever = SchemaRetriever::new(&catalog, &index, &embedder, Some("p")).unwrap();

        let ranked = retriever.rank("anything", 4).await.unwrap();
        assert_eq!(names(&ranked), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_rank_is_deterministic() {
        let catalog = SchemaCatalog::new(vec![table("incidents"), table("buildings")]).unwrap();
        let embedder = HashingEmbedder::new(64);
        let index = crate::schema_rag::index_builder::IndexBuilder::new(&embedder)
            .build(&catalog)
            .await
            .unwrap();
        let retriever = SchemaRetriever::new(&catalog, &index, &embedder, None).unwrap();

        let first = names(&retriever.rank("open incidents", 3).await.unwrap());
        for _ in 0..5 {
            assert_eq!(names(&retriever.rank("open incidents", 3).await.unwrap()), first);
        }
    }

    #[tokio::test]
    async fn test_rank_zero_k_and_dimension_guard() {
        let (catalog, index) = fixture();
        let embedder = FixedEmbedder(vec![0.0]);
        let retriever = SchemaRetriever::new(&catalog, &index, &embedder, None).unwrap();
        assert!(retriever.rank("q", 0).await.unwrap().is_empty());

        let wide = FixedEmbedder(vec![0.0, 0.0]);
        assert!(SchemaRetriever::new(&catalog, &index, &wide, None).is_err());
    }
}
