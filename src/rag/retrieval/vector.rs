use std::sync::Arc;
use tracing::debug;

use super::{HitSource, QueryExpander, RetrievalHit};
use crate::config::{RetrievalConfig, TimeoutSettings};
use crate::errors::{with_timeout, RagError, Result};
use crate::memory::embedding::Embedder;
use crate::memory::vector_db::{PointFilter, VectorStore};

/// Similarity search over one collection, scoped to one source document
pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    expander: QueryExpander,
    config: RetrievalConfig,
    timeouts: TimeoutSettings,
}

impl VectorRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
        timeouts: TimeoutSettings,
    ) -> Self {
        Self {
            expander: QueryExpander::with_extra(&config.synonyms),
            store,
            embedder,
            config,
            timeouts,
        }
    }

    /// Candidates requested from the store for `limit` kept passages
    pub fn candidate_count(&self, limit: usize) -> usize {
        limit * self.config.oversampling.max(2)
    }

    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        scope_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RetrievalHit>> {
        let info = with_timeout("collection lookup", self.timeouts.retrieve(), async {
            self.store.collection_info(collection).await
        })
        .await?
        .ok_or_else(|| RagError::not_found("collection", collection))?;

        let expanded = self.expander.expand(query);
        let vector = with_timeout("embed", self.timeouts.embed(), self.embedder.encode(&expanded)).await?;

        if vector.len() != info.dimension {
            return Err(RagError::DimensionMismatch {
                collection: collection.to_string(),
                expected: info.dimension,
                actual: vector.len(),
            });
        }

        let filter = match scope_id {
            Some(id) => PointFilter::default().scoped(&self.config.scope_key, id),
            None => PointFilter::default(),
        };

        let candidates = self.candidate_count(limit);
        let points = with_timeout(
            "vector search",
            self.timeouts.retrieve(),
            self.store.search(collection, &vector, &filter, candidates, None),
        )
        .await?;

        let hits: Vec<RetrievalHit> = points
            .into_iter()
            .filter(|p| p.score >= self.config.min_score)
            .map(|p| RetrievalHit {
                point_id: p.id,
                text: p.text,
                score: p.score,
                source: HitSource::Vector,
            })
            .collect();

        debug!(collection, candidates, hits = hits.len(), "Vector search complete");
        Ok(hits)
    }
}
