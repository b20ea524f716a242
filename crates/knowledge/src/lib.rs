//! Knowledge store for Kiln: chunking, embedding, persistence, and
//! similarity retrieval over local text.

pub mod chunk;
pub mod document;
pub mod indexer;
pub mod store;
pub mod vector;

mod persistence;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use chunk::Chunker;
pub use document::{AddReport, Document, IndexReport, SearchHit, source_metadata};
pub use indexer::collect_files;
pub use store::{KnowledgeStore, StoreOptions};
pub use vector::{cosine_similarity, rank};
