//! Vector store abstraction
//!
//! The retrievers and the indexer talk to a [`VectorStore`]; Qdrant and an
//! in-process store implement it. Point ids are carried as strings: numeric
//! ids stay numeric on the wire and sort numerically.

pub mod in_memory;
pub mod manager;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::errors::Result;

pub use in_memory::InMemoryVectorStore;
pub use manager::QdrantVectorStore;

/// Payload key holding passage text
pub const TEXT_KEY: &str = "text";

/// Similarity metric of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

/// Collection summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub points: u64,
}

/// Payload conditions, all of which must hold
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointFilter {
    /// (payload key, scope id)
    pub scope: Option<(String, String)>,
    /// Every word of this text must occur in the passage as a word
    pub text: Option<String>,
}

impl PointFilter {
    pub fn scoped(mut self, key: &str, scope_id: &str) -> Self {
        self.scope = Some((key.to_string(), scope_id.to_string()));
        self
    }

    pub fn matching_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.scope.is_none() && self.text.is_none()
    }
}

/// Search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Record returned by scrolling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPoint {
    pub id: String,
    pub text: String,
}

/// One page of a scroll
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub points: Vec<StoredPoint>,
    pub next_cursor: Option<String>,
}

/// Point to insert or replace
#[derive(Debug, Clone, PartialEq)]
pub struct NewPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    /// (payload key, scope id)
    pub scope: Option<(String, String)>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// `None` when the collection does not exist
    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>>;

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_collections().await?.iter().any(|c| c == name))
    }

    async fn create_collection(&self, name: &str, dimension: usize, distance: Distance) -> Result<()>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &PointFilter,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>>;

    async fn scroll(
        &self,
        collection: &str,
        filter: &PointFilter,
        page_limit: u32,
        cursor: Option<String>,
    ) -> Result<ScrollPage>;

    async fn upsert(&self, collection: &str, points: Vec<NewPoint>) -> Result<()>;

    async fn delete(&self, collection: &str, filter: &PointFilter) -> Result<()>;
}

/// Numeric ids compare numerically, everything else lexically
pub fn cmp_point_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Lowercased whitespace tokens
pub fn terms(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
