//! Schema Catalog
//!
//! Typed, validated view of the tables an index is built over. The catalog is
//! loaded from the `schema.json` document written by the schema extractor and
//! is read-only afterwards.

use crate::error::{Result, SqlRagError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub description: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKey {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

impl ForeignKey {
    /// Parses `Table(column)` or `Table.column`.
    pub fn parse(column: &str, references: &str) -> Result<Self> {
        let references = references.trim();
        let parsed = if let Some(open) = references.find('(') {
            references
                .strip_suffix(')')
                .map(|inner| (&inner[..open], &inner[open + 1..]))
        } else {
            references.split_once('.')
        };

        match parsed {
            Some((table, col)) if !table.trim().is_empty() && !col.trim().is_empty() => Ok(Self {
                column: column.to_string(),
                referenced_table: table.trim().to_string(),
                referenced_column: col.trim().to_string(),
            }),
            _ => Err(SqlRagError::Catalog(format!(
                "Malformed foreign key reference '{}' on column '{}'",
                references, column
            ))),
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{} references {}({})",
            self.column, self.referenced_table, self.referenced_column
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// The column used as the table's identity in pruned schemas: the first
    /// declared primary-key column, else the first `*_PRK` column.
    pub fn primary_key_column(&self) -> Option<&str> {
        self.primary_key
            .first()
            .map(|s| s.as_str())
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.name.ends_with("_PRK"))
                    .map(|c| c.name.as_str())
            })
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SqlRagError::Catalog(format!(
                    "Duplicate column '{}' in table '{}'",
                    column.name, self.name
                )));
            }
        }
        for pk in &self.primary_key {
            if !seen.contains(pk.as_str()) {
                return Err(SqlRagError::Catalog(format!(
                    "Primary key column '{}' is not a column of '{}'",
                    pk, self.name
                )));
            }
        }
        for fk in &self.foreign_keys {
            if !seen.contains(fk.column.as_str()) {
                return Err(SqlRagError::Catalog(format!(
                    "Foreign key column '{}' is not a column of '{}'",
                    fk.column, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Lookup contract the HTTP boundary and orchestrator use for one table.
pub trait SchemaSource: Send + Sync {
    fn describe(&self, table_name: &str) -> Result<TableDescriptor>;
}

#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: Vec<TableDescriptor>,
    by_name: HashMap<String, usize>,
}

impl SchemaCatalog {
    pub fn new(tables: Vec<TableDescriptor>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(tables.len());
        for (idx, table) in tables.iter().enumerate() {
            table.validate()?;
            if by_name.insert(table.name.clone(), idx).is_some() {
                return Err(SqlRagError::Catalog(format!(
                    "Duplicate table '{}' in catalog",
                    table.name
                )));
            }
        }
        Ok(Self { tables, by_name })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SqlRagError::Catalog(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_json(&content).map_err(|e| match e {
            SqlRagError::Json(e) => {
                SqlRagError::Catalog(format!("Failed to parse {}: {}", path.display(), e))
            }
            other => other,
        })?;
        tracing::info!(path = %path.display(), tables = catalog.len(), "Loaded schema catalog");
        Ok(catalog)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let raw: Vec<RawTable> = serde_json::from_str(content)?;
        let tables = raw
            .into_iter()
            .map(RawTable::into_descriptor)
            .collect::<Result<Vec<_>>>()?;
        Self::new(tables)
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Option<&TableDescriptor> {
        self.by_name.get(name).map(|&idx| &self.tables[idx])
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl SchemaSource for SchemaCatalog {
    fn describe(&self, table_name: &str) -> Result<TableDescriptor> {
        self.get(table_name)
            .cloned()
            .ok_or_else(|| SqlRagError::SchemaNotFound(table_name.to_string()))
    }
}

// On-disk shapes of schema.json. Kept private so nothing downstream sees the
// loosely typed form.

#[derive(Debug, Deserialize)]
struct RawTable {
    table_name: String,
    columns: Vec<RawColumn>,
    #[serde(default)]
    primary_key: Option<RawPrimaryKey>,
    #[serde(default)]
    foreign_keys: Vec<RawForeignKey>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default)]
    nullable: Option<RawNullable>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPrimaryKey {
    Single(String),
    Composite(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNullable {
    Flag(bool),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawForeignKey {
    column: String,
    references: String,
}

impl RawTable {
    fn into_descriptor(self) -> Result<TableDescriptor> {
        let columns = self
            .columns
            .into_iter()
            .map(|c| {
                let nullable = match c.nullable {
                    None => true,
                    Some(RawNullable::Flag(flag)) => flag,
                    Some(RawNullable::Text(text)) => !text.eq_ignore_ascii_case("NO"),
                };
                ColumnDescriptor {
                    name: c.name,
                    data_type: c.data_type,
                    nullable,
                    description: c.description.filter(|d| !d.trim().is_empty()),
                }
            })
            .collect();

        let primary_key = match self.primary_key {
            None => Vec::new(),
            Some(RawPrimaryKey::Single(pk)) => vec![pk],
            Some(RawPrimaryKey::Composite(pks)) => pks,
        };

        let foreign_keys = self
            .foreign_keys
            .iter()
            .map(|fk| ForeignKey::parse(&fk.column, &fk.references))
            .collect::<Result<Vec<_>>>()?;

        Ok(TableDescriptor {
            name: self.table_name,
            columns,
            primary_key,
            foreign_keys,
        })
    }
}
