//! Index Builder
//!
//! Offline, whole-catalog build of the schema vector index. Any catalog change
//! means a full rebuild followed by a swap of the persisted pair.

use crate::catalog::{ColumnDescriptor, SchemaCatalog, TableDescriptor};
use crate::error::{Result, SqlRagError};
use crate::schema_rag::embedder::Embedder;
use crate::schema_rag::vector_store::{EmbeddingRecord, FlatL2Index, IndexManifest, IndexStore};
use tracing::info;

/// `Table: T. Columns: a (INT), b (TEXT). Foreign Keys: a references U(id)`
pub fn describe_table(table: &TableDescriptor) -> String {
    let column_details = table
        .columns
        .iter()
        .map(|c| format!("{} ({})", c.name, c.data_type))
        .collect::<Vec<_>>()
        .join(", ");
    let mut text = format!("Table: {}. Columns: {}.", table.name, column_details);
    if !table.foreign_keys.is_empty() {
        let fks = table
            .foreign_keys
            .iter()
            .map(|fk| fk.describe())
            .collect::<Vec<_>>()
            .join("; ");
        text.push_str(" Foreign Keys: ");
        text.push_str(&fks);
    }
    text
}

/// `T.c (type)`, followed by the column comment when the catalog has one.
pub fn describe_column(table_name: &str, column: &ColumnDescriptor) -> String {
    match &column.description {
        Some(description) => format!(
            "{}.{} ({}). {}",
            table_name, column.name, column.data_type, description
        ),
        None => format!("{}.{} ({})", table_name, column.name, column.data_type),
    }
}

/// Metadata records in index order: each table, then its columns.
pub fn catalog_records(catalog: &SchemaCatalog) -> Vec<EmbeddingRecord> {
    let mut records = Vec::new();
    for table in catalog.tables() {
        records.push(EmbeddingRecord {
            embedding_id: records.len(),
            table: table.name.clone(),
            column: None,
            description: describe_table(table),
        });
        for column in &table.columns {
            records.push(EmbeddingRecord {
                embedding_id: records.len(),
                table: table.name.clone(),
                column: Some(column.name.clone()),
                description: describe_column(&table.name, column),
            });
        }
    }
    records
}

pub struct IndexBuilder<'a> {
    embedder: &'a dyn Embedder,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(embedder: &'a dyn Embedder) -> Self {
        Self { embedder }
    }

    pub async fn build(&self, catalog: &SchemaCatalog) -> Result<FlatL2Index> {
        let records = catalog_records(catalog);
        let texts: Vec<String> = records.iter().map(|r| r.description.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let dimension = self.embedder.dimension();
        if let Some(bad) = embeddings.iter().position(|e| e.len() != dimension) {
            return Err(SqlRagError::Embedding(format!(
                "Embedding for '{}' has {} dimensions, model {} declares {}",
                records[bad].description,
                embeddings[bad].len(),
                self.embedder.model_id(),
                dimension
            )));
        }

        info!(
            tables = catalog.len(),
            records = records.len(),
            model = self.embedder.model_id(),
            "Embedded schema catalog"
        );
        FlatL2Index::new(dimension, records, embeddings)
    }

    /// Builds and persists; the previous generation stays active until the
    /// new pair is fully written.
    pub async fn build_and_persist(
        &self,
        catalog: &SchemaCatalog,
        store: &IndexStore,
    ) -> Result<IndexManifest> {
        let index = self.build(catalog).await?;
        store.save(&index, self.embedder.model_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ForeignKey;
    use crate::schema_rag::embedder::HashingEmbedder;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            TableDescriptor::new(
                "IncidentLog_TBL",
                vec![
                    ColumnDescriptor::new("inlIncident_PRK", "INTEGER", false),
                    ColumnDescriptor::new("inlStatus_FRK", "INTEGER", true),
                ],
            )
            .with_primary_key(&["inlIncident_PRK"])
            .with_foreign_key(
                ForeignKey::parse("inlStatus_FRK", "IncidentStatus_TBL(insStatus_PRK)").unwrap(),
            ),
            TableDescriptor::new(
                "IncidentStatus_TBL",
                vec![ColumnDescriptor::new("insStatus_PRK", "INTEGER", false)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_describe_table_with_foreign_keys() {
        let catalog = catalog();
        assert_eq!(
            describe_table(&catalog.tables()[0]),
            "Table: IncidentLog_TBL. Columns: inlIncident_PRK (INTEGER), inlStatus_FRK (INTEGER). \
             Foreign Keys: inlStatus_FRK references IncidentStatus_TBL(insStatus_PRK)"
        );
        assert_eq!(
            describe_table(&catalog.tables()[1]),
            "Table: IncidentStatus_TBL. Columns: insStatus_PRK (INTEGER)."
        );
    }

    #[test]
    fn test_describe_column_appends_description() {
        let column = ColumnDescriptor::new("inlCreatedDate", "DATETIME", true)
            .with_description("When the incident was logged");
        assert_eq!(
            describe_column("IncidentLog_TBL", &column),
            "IncidentLog_TBL.inlCreatedDate (DATETIME). When the incident was logged"
        );
    }

    #[test]
    fn test_records_are_dense_and_ordered() {
        let records = catalog_records(&catalog());
        let layout: Vec<(usize, &str, Option<&str>)> = records
            .iter()
            .map(|r| (r.embedding_id, r.table.as_str(), r.column.as_deref()))
            .collect();
        assert_eq!(
            layout,
            vec![
                (0, "IncidentLog_TBL", None),
                (1, "IncidentLog_TBL", Some("inlIncident_PRK")),
                (2, "IncidentLog_TBL", Some("inlStatus_FRK")),
                (3, "IncidentStatus_TBL", None),
                (4, "IncidentStatus_TBL", Some("insStatus_PRK")),
            ]
        );
        assert_eq!(records[1].description, "IncidentLog_TBL.inlIncident_PRK (INTEGER)");
    }

    #[tokio::test]
    async fn test_build_and_persist() {
        let embedder = HashingEmbedder::new(32);
        let dir = tempfile::tempdir().unwrap();
        let store = IndexStore::new(dir.path());

        let manifest = IndexBuilder::new(&embedder)
            .build_and_persist(&catalog(), &store)
            .await
            .unwrap();
        assert_eq!(manifest.records, 5);
        assert_eq!(manifest.embedding_model, "hashing-32");

        let loaded = store.load().unwrap();
        assert_eq!(loaded.index.len(), 5);
        assert_eq!(loaded.index.dimension(), 32);
    }
}
