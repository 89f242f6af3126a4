use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlRagError {
    #[error("Table '{0}' not found in schema catalog")]
    SchemaNotFound(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Canonicalization rule error: {0}")]
    Rule(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),
}

impl SqlRagError {
    /// Errors a caller may see verbatim; everything else is reported as an
    /// internal error at the service boundary.
    pub fn is_client_facing(&self) -> bool {
        matches!(self, SqlRagError::SchemaNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, SqlRagError>;
