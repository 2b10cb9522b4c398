//! Collection setup and passage ingestion
//!
//! Passages are embedded in one batch and stored with their text under the
//! `text` payload key and the source document id under the configured scope
//! key, which is what both retrievers filter on.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{RetrievalConfig, TimeoutSettings};
use crate::errors::{with_timeout, RagError, Result};
use crate::memory::embedding::Embedder;
use crate::memory::vector_db::{Distance, NewPoint, PointFilter, VectorStore};

/// Text to index; a fresh UUID is assigned when `id` is absent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
}

impl Passage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: text.into(),
        }
    }
}

/// Point ids must be unsigned integers or UUIDs to be portable across stores
fn check_point_id(id: &str) -> Result<()> {
    if id.parse::<u64>().is_ok() || Uuid::parse_str(id).is_ok() {
        Ok(())
    } else {
        Err(RagError::ValidationError(format!(
            "point id must be an unsigned integer or UUID: {}",
            id
        )))
    }
}

pub struct DocumentIndexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    scope_key: String,
    timeouts: TimeoutSettings,
}

impl DocumentIndexer {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: &RetrievalConfig,
        timeouts: TimeoutSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            scope_key: config.scope_key.clone(),
            timeouts,
        }
    }

    /// Create a cosine collection sized to the embedder
    pub async fn create_collection(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(RagError::ValidationError("collection name is empty".to_string()));
        }
        if self.store.collection_exists(name).await? {
            return Err(RagError::ValidationError(format!("Collection already exists: {}", name)));
        }

        let dimension = self.embedder.dimension();
        self.store.create_collection(name, dimension, Distance::Cosine).await?;
        info!(collection = name, dimension, "Created collection");
        Ok(())
    }

    pub async fn list_collections(&self) -> Result<Vec<String>> {
        self.store.list_collections().await
    }

    /// Embed and store passages belonging to `scope_id`.
    ///
    /// Returns the point ids in passage order.
    pub async fn upsert_passages(
        &self,
        collection: &str,
        scope_id: &str,
        passages: Vec<Passage>,
    ) -> Result<Vec<String>> {
        if scope_id.trim().is_empty() {
            return Err(RagError::ValidationError("scope id is empty".to_string()));
        }
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(p) = passages.iter().find(|p| p.text.trim().is_empty()) {
            return Err(RagError::ValidationError(format!(
                "passage {} has no text",
                p.id.as_deref().unwrap_or("(new)")
            )));
        }

        let info = self
            .store
            .collection_info(collection)
            .await?
            .ok_or_else(|| RagError::not_found("collection", collection))?;

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = with_timeout("embed", self.timeouts.embed(), self.embedder.encode_batch(&texts)).await?;

        if let Some(v) = vectors.iter().find(|v| v.len() != info.dimension) {
            return Err(RagError::DimensionMismatch {
                collection: collection.to_string(),
                expected: info.dimension,
                actual: v.len(),
            });
        }

        let mut ids = Vec::with_capacity(passages.len());
        let mut points = Vec::with_capacity(passages.len());
        for (passage, vector) in passages.into_iter().zip(vectors) {
            let id = match passage.id {
                Some(id) => {
                    check_point_id(&id)?;
                    id
                }
                None => Uuid::new_v4().to_string(),
            };
            ids.push(id.clone());
            points.push(NewPoint {
                id,
                vector,
                text: passage.text,
                scope: Some((self.scope_key.clone(), scope_id.to_string())),
            });
        }

        with_timeout("upsert", self.timeouts.retrieve(), self.store.upsert(collection, points)).await?;
        info!(collection, scope_id, points = ids.len(), "Indexed passages");
        Ok(ids)
    }

    /// Remove every passage of one source document.
    ///
    /// Idempotent: a missing collection or document is not an error.
    pub async fn delete_document(&self, collection: &str, scope_id: &str) -> Result<()> {
        let filter = PointFilter::default().scoped(&self.scope_key, scope_id);
        match self.store.delete(collection, &filter).await {
            Ok(()) => {
                debug!(collection, scope_id, "Deleted document passages");
                Ok(())
            }
            Err(RagError::NotFound { .. }) => {
                debug!(collection, scope_id, "Nothing to delete");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
