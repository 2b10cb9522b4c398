//! Embedding and vector storage collaborators
//!
//! Components:
//! - Embedding: sentence encoders and the worker pool that runs them
//! - Vector DB: the store contract plus Qdrant and in-process backends

pub mod embedding;
pub mod vector_db;

pub use embedding::{Embedder, EmbeddingPool, TextEncoder};
pub use vector_db::{InMemoryVectorStore, QdrantVectorStore, VectorStore};
