//! Weighted score fusion of vector and keyword hits.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{RagError, Result};
use crate::memory::vector_db::cmp_point_ids;
use crate::rag::retrieval::RetrievalHit;

/// Passage after fusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedHit {
    pub point_id: String,
    pub text: String,
    pub fused_score: f32,
}

/// Weights of the two sources.
///
/// Fused scores stay within `[0, 1]` as long as input scores do and
/// `alpha + beta <= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub alpha: f32,
    pub beta: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self { alpha: 0.7, beta: 0.3 }
    }
}

impl FusionWeights {
    pub fn new(alpha: f32, beta: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) || !(0.0..=1.0).contains(&beta) {
            return Err(RagError::ValidationError(format!(
                "fusion weights must be within [0, 1], got alpha={} beta={}",
                alpha, beta
            )));
        }
        Ok(Self { alpha, beta })
    }
}

/// Merge both hit lists by point id.
///
/// - In both lists: `alpha * vector + beta * keyword`, vector text kept
/// - In one list: that score times the weight of its source
///
/// Sorted by fused score descending, ties by point id ascending, then
/// truncated to `limit`.
pub fn merge(
    vector_hits: &[RetrievalHit],
    keyword_hits: &[RetrievalHit],
    alpha: f32,
    beta: f32,
    limit: usize,
) -> Vec<MergedHit> {
    let keyword: HashMap<&str, &RetrievalHit> = keyword_hits
        .iter()
        .map(|h| (h.point_id.as_str(), h))
        .collect();

    let mut merged: HashMap<String, MergedHit> = HashMap::new();

    for hit in vector_hits {
        let fused_score = match keyword.get(hit.point_id.as_str()) {
            Some(k) => alpha * hit.score + beta * k.score,
            None => alpha * hit.score,
        };
        merged.insert(
            hit.point_id.clone(),
            MergedHit {
                point_id: hit.point_id.clone(),
                text: hit.text.clone(),
                fused_score,
            },
        );
    }

    for hit in keyword_hits {
        merged.entry(hit.point_id.clone()).or_insert_with(|| MergedHit {
            point_id: hit.point_id.clone(),
            text: hit.text.clone(),
            fused_score: beta * hit.score,
        });
    }

    let mut results: Vec<MergedHit> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| cmp_point_ids(&a.point_id, &b.point_id))
    });
    results.truncate(limit);
    results
}

/// Fusion step with fixed weights and result limit
#[derive(Debug, Clone)]
pub struct ResultFusion {
    weights: FusionWeights,
    limit: usize,
}

impl ResultFusion {
    pub fn new(weights: FusionWeights, limit: usize) -> Self {
        Self { weights, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn merge(&self, vector_hits: &[RetrievalHit], keyword_hits: &[RetrievalHit]) -> Vec<MergedHit> {
        merge(
            vector_hits,
            keyword_hits,
            self.weights.alpha,
            self.weights.beta,
            self.limit,
        )
    }
}

impl Default for ResultFusion {
    fn default() -> Self {
        Self::new(FusionWeights::default(), 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::retrieval::HitSource;

    fn hit(id: &str, text: &str, score: f32, source: HitSource) -> RetrievalHit {
        RetrievalHit {
            point_id: id.to_string(),
            text: text.to_string(),
            score,
            source,
        }
    }

    #[test]
    fn test_both_sources_weighted_sum() {
        let v = vec![hit("1", "vector text", 0.9, HitSource::Vector)];
        let k = vec![hit("1", "keyword text", 0.5, HitSource::Keyword)];
        let merged = merge(&v, &k, 0.7, 0.3, 5);

        assert_eq!(merged.len(), 1);
        assert!((merged[0].fused_score - 0.78).abs() < 1e-6);
        assert_eq!(merged[0].text, "vector text");
    }

    #[test]
    fn test_single_source_scaled_by_weight() {
        let v = vec![hit("1", "a", 0.9, HitSource::Vector)];
        let k = vec![hit("2", "b", 0.5, HitSource::Keyword)];
        let merged = merge(&v, &k, 0.7, 0.3, 5);

        assert_eq!(merged[0].point_id, "1");
        assert!((merged[0].fused_score - 0.63).abs() < 1e-6);
        assert!((merged[1].fused_score - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_ties_broken_by_point_id() {
        let v = vec![
            hit("10", "x", 0.5, HitSource::Vector),
            hit("2", "y", 0.5, HitSource::Vector),
            hit("3", "z", 0.5, HitSource::Vector),
        ];
        let merged = merge(&v, &[], 0.7, 0.3, 2);
        let ids: Vec<&str> = merged.iter().map(|m| m.point_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(&[], &[], 0.7, 0.3, 5).is_empty());
    }

    #[test]
    fn test_weights_validated() {
        assert!(FusionWeights::new(1.2, 0.0).is_err());
        assert!(FusionWeights::new(0.7, 0.3).is_ok());
    }

    #[test]
    fn test_fusion_default_limit() {
        let v: Vec<RetrievalHit> = (0..8)
            .map(|i| hit(&i.to_string(), "t", 0.9 - i as f32 * 0.05, HitSource::Vector))
            .collect();
        assert_eq!(ResultFusion::default().merge(&v, &[]).len(), 5);
    }
}
