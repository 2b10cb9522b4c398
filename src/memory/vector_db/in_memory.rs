//! In-process vector store
//!
//! Same contract as the Qdrant store: existence checks, dimension checks on
//! upsert, payload filters, paged scroll ordered by point id.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use super::{
    cmp_point_ids, CollectionInfo, Distance, NewPoint, PointFilter, ScoredPoint,
    ScrollPage, StoredPoint, VectorStore,
};
use crate::errors::{RagError, Result};

#[derive(Debug, Clone)]
struct Record {
    vector: Vec<f32>,
    text: String,
    scope: Option<(String, String)>,
}

#[derive(Debug)]
struct Collection {
    dimension: usize,
    distance: Distance,
    points: HashMap<String, Record>,
}

impl Collection {
    fn sorted_ids(&self) -> Vec<&String> {
        let mut ids: Vec<&String> = self.points.keys().collect();
        ids.sort_by(|a, b| cmp_point_ids(a, b));
        ids
    }
}

#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn passes_filter(record: &Record, filter: &PointFilter) -> bool {
    if let Some((key, value)) = &filter.scope {
        match &record.scope {
            Some((k, v)) if k == key && v == value => {}
            _ => return false,
        }
    }
    if let Some(text) = &filter.text {
        let haystack: HashSet<String> = words(&record.text).collect();
        if !words(text).all(|w| haystack.contains(&w)) {
            return false;
        }
    }
    true
}

/// Lowercased alphanumeric runs, the way a word-tokenized text index splits
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn similarity(distance: Distance, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match distance {
        Distance::Dot => dot,
        Distance::Cosine => {
            let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if na == 0.0 || nb == 0.0 {
                0.0
            } else {
                dot / (na * nb)
            }
        }
        Distance::Euclid => {
            let d = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt();
            1.0 / (1.0 + d)
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        Ok(self.collections.read().await.get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            dimension: c.dimension,
            points: c.points.len() as u64,
        }))
    }

    async fn create_collection(&self, name: &str, dimension: usize, distance: Distance) -> Result<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(name) {
            return Err(RagError::ValidationError(format!("Collection already exists: {}", name)));
        }
        collections.insert(
            name.to_string(),
            Collection {
                dimension,
                distance,
                points: HashMap::new(),
            },
        );
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        filter: &PointFilter,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredPoint>> {
        let collections = self.collections.read().await;
        let c = collections
            .get(collection)
            .ok_or_else(|| RagError::not_found("collection", collection))?;

        if vector.len() != c.dimension {
            return Err(RagError::DimensionMismatch {
                collection: collection.to_string(),
                expected: c.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<ScoredPoint> = c
            .points
            .iter()
            .filter(|(_, r)| passes_filter(r, filter))
            .map(|(id, r)| ScoredPoint {
                id: id.clone(),
                text: r.text.clone(),
                score: similarity(c.distance, vector, &r.vector),
            })
            .filter(|hit| score_threshold.map_or(true, |t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| cmp_point_ids(&a.id, &b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &PointFilter,
        page_limit: u32,
        cursor: Option<String>,
    ) -> Result<ScrollPage> {
        let collections = self.collections.read().await;
        let c = collections
            .get(collection)
            .ok_or_else(|| RagError::not_found("collection", collection))?;

        let mut matching = c
            .sorted_ids()
            .into_iter()
            .filter(|id| {
                cursor
                    .as_deref()
                    .map_or(true, |cur| cmp_point_ids(id, cur) != std::cmp::Ordering::Less)
            })
            .filter(|id| passes_filter(&c.points[*id], filter));

        let points: Vec<StoredPoint> = matching
            .by_ref()
            .take(page_limit as usize)
            .map(|id| StoredPoint {
                id: id.clone(),
                text: c.points[id].text.clone(),
            })
            .collect();
        let next_cursor = matching.next().cloned();

        Ok(ScrollPage { points, next_cursor })
    }

    async fn upsert(&self, collection: &str, points: Vec<NewPoint>) -> Result<()> {
        let mut collections = self.collections.write().await;
        let c = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::not_found("collection", collection))?;

        if let Some(bad) = points.iter().find(|p| p.vector.len() != c.dimension) {
            return Err(RagError::DimensionMismatch {
                collection: collection.to_string(),
                expected: c.dimension,
                actual: bad.vector.len(),
            });
        }

        for p in points {
            c.points.insert(
                p.id,
                Record {
                    vector: p.vector,
                    text: p.text,
                    scope: p.scope,
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &PointFilter) -> Result<()> {
        let mut collections = self.collections.write().await;
        let c = collections
            .get_mut(collection)
            .ok_or_else(|| RagError::not_found("collection", collection))?;
        c.points.retain(|_, r| !passes_filter(r, filter));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, vector: Vec<f32>, text: &str, scope: &str) -> NewPoint {
        NewPoint {
            id: id.to_string(),
            vector,
            text: text.to_string(),
            scope: Some(("id".to_string(), scope.to_string())),
        }
    }

    async fn seeded() -> InMemoryVectorStore {
        let store = InMemoryVectorStore::new();
        store.create_collection("docs", 2, Distance::Cosine).await.unwrap();
        store
            .upsert(
                "docs",
                vec![
                    point("1", vec![1.0, 0.0], "rust ownership rules", "a"),
                    point("2", vec![0.0, 1.0], "python generators", "a"),
                    point("3", vec![1.0, 0.1], "rust borrow checker", "b"),
                ],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_search_respects_scope() {
        let store = seeded().await;
        let filter = PointFilter::default().scoped("id", "a");
        let hits = store.search("docs", &[1.0, 0.0], &filter, 10, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "1");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_search_threshold() {
        let store = seeded().await;
        let hits = store
            .search("docs", &[1.0, 0.0], &PointFilter::default(), 10, Some(0.5))
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.score >= 0.5));
        assert!(hits.iter().all(|h| h.id != "2"));
    }

    #[tokio::test]
    async fn test_upsert_rejects_wrong_dimension() {
        let store = seeded().await;
        let err = store
            .upsert("docs", vec![point("9", vec![1.0], "x", "a")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 1, .. }));
    }

    #[tokio::test]
    async fn test_scroll_pages_until_exhausted() {
        let store = seeded().await;
        let first = store.scroll("docs", &PointFilter::default(), 2, None).await.unwrap();
        assert_eq!(first.points.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("3"));

        let second = store
            .scroll("docs", &PointFilter::default(), 2, first.next_cursor)
            .await
            .unwrap();
        assert_eq!(second.points.len(), 1);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_text_filter_requires_all_terms() {
        let store = seeded().await;
        let filter = PointFilter::default().matching_text("Rust borrow");
        let page = store.scroll("docs", &filter, 10, None).await.unwrap();
        assert_eq!(page.points.len(), 1);
        assert_eq!(page.points[0].id, "3");
    }

    #[tokio::test]
    async fn test_text_filter_matches_whole_words() {
        let store = seeded().await;

        let partial = PointFilter::default().matching_text("borr");
        assert!(store.scroll("docs", &partial, 10, None).await.unwrap().points.is_empty());

        let reordered = PointFilter::default().matching_text("Checker, RUST");
        let page = store.scroll("docs", &reordered, 10, None).await.unwrap();
        assert_eq!(page.points.len(), 1);
        assert_eq!(page.points[0].id, "3");
    }

    #[tokio::test]
    async fn test_delete_by_scope() {
        let store = seeded().await;
        store
            .delete("docs", &PointFilter::default().scoped("id", "a"))
            .await
            .unwrap();
        let info = store.collection_info("docs").await.unwrap().unwrap();
        assert_eq!(info.points, 1);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let store = InMemoryVectorStore::new();
        assert!(!store.collection_exists("nope").await.unwrap());
        let err = store
            .search("nope", &[1.0], &PointFilter::default(), 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }
}
