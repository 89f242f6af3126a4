pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod llm;
pub mod orchestrator;
pub mod relevance;
pub mod schema_rag;
pub mod sql;

pub use error::{Result, SqlRagError};
