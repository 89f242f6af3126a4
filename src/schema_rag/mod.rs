pub mod embedder;
pub mod index_builder;
pub mod retriever;
pub mod vector_store;

pub use embedder::*;
pub use index_builder::*;
pub use retriever::*;
pub use vector_store::*;
