use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::{HitSource, RetrievalHit};
use crate::config::{RetrievalConfig, TimeoutSettings};
use crate::errors::{with_timeout, RagError, Result};
use crate::memory::vector_db::{cmp_point_ids, terms, PointFilter, StoredPoint, VectorStore};

/// Lexical relevance of `text` to `query`.
///
/// `0.6 * jaccard(query terms, text terms) + 0.4 * sum(count(term) / total words)`,
/// clamped to `[0, 1]`.
pub fn keyword_score(query: &str, text: &str) -> f32 {
    let query_terms: HashSet<String> = terms(query).into_iter().collect();
    if query_terms.is_empty() {
        return 0.0;
    }

    let words = terms(text);
    let text_terms: HashSet<&str> = words.iter().map(String::as_str).collect();

    let intersection = query_terms.iter().filter(|t| text_terms.contains(t.as_str())).count();
    let union = query_terms.len() + text_terms.len() - intersection;
    let jaccard = if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    };

    let frequency = if words.is_empty() {
        0.0
    } else {
        query_terms
            .iter()
            .map(|t| words.iter().filter(|w| *w == t).count() as f32 / words.len() as f32)
            .sum()
    };

    (0.6 * jaccard + 0.4 * frequency).clamp(0.0, 1.0)
}

/// Text-match search: scrolls every matching record and scores it lexically
pub struct KeywordRetriever {
    store: Arc<dyn VectorStore>,
    config: RetrievalConfig,
    timeouts: TimeoutSettings,
}

impl KeywordRetriever {
    pub fn new(store: Arc<dyn VectorStore>, config: RetrievalConfig, timeouts: TimeoutSettings) -> Self {
        Self {
            store,
            config,
            timeouts,
        }
    }

    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        scope_id: Option<&str>,
    ) -> Result<Vec<RetrievalHit>> {
        let mut filter = PointFilter::default().matching_text(query);
        if let Some(id) = scope_id {
            filter = filter.scoped(&self.config.scope_key, id);
        }

        let mut hits = Vec::new();
        let scanned = self
            .scroll_all(collection, &filter, |point| {
                if point.text.trim().is_empty() {
                    return;
                }
                let score = keyword_score(query, &point.text);
                if score > self.config.keyword_min_score {
                    hits.push(RetrievalHit {
                        point_id: point.id,
                        text: point.text,
                        score,
                        source: HitSource::Keyword,
                    });
                }
            })
            .await?;

        debug!(collection, scanned, hits = hits.len(), "Keyword search complete");
        Ok(hits)
    }

    /// Every passage of one source document, in point id order
    pub async fn document_passages(&self, collection: &str, scope_id: &str) -> Result<Vec<StoredPoint>> {
        let filter = PointFilter::default().scoped(&self.config.scope_key, scope_id);

        let mut passages = Vec::new();
        self.scroll_all(collection, &filter, |point| {
            if !point.text.trim().is_empty() {
                passages.push(point);
            }
        })
        .await?;

        passages.sort_by(|a, b| cmp_point_ids(&a.id, &b.id));
        debug!(collection, scope_id, passages = passages.len(), "Loaded document passages");
        Ok(passages)
    }

    /// Page through every record matching `filter`; returns the number scanned
    async fn scroll_all<F>(&self, collection: &str, filter: &PointFilter, mut visit: F) -> Result<usize>
    where
        F: FnMut(StoredPoint),
    {
        if !with_timeout("collection lookup", self.timeouts.retrieve(), async {
            self.store.collection_exists(collection).await
        })
        .await?
        {
            return Err(RagError::not_found("collection", collection));
        }

        let mut scanned = 0usize;
        let mut cursor = None;
        loop {
            let page = with_timeout(
                "keyword scroll",
                self.timeouts.retrieve(),
                self.store
                    .scroll(collection, filter, self.config.keyword_page_size, cursor.take()),
            )
            .await?;

            if page.points.is_empty() {
                break;
            }
            scanned += page.points.len();
            page.points.into_iter().for_each(&mut visit);

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(scanned)
    }
}
