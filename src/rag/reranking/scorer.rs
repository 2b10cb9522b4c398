// Rerank scorer: blends fused relevance with passage shape
use serde::{Deserialize, Serialize};

use crate::memory::vector_db::cmp_point_ids;
use crate::rag::fusion::MergedHit;

/// Weights and floor of the rerank pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub semantic_weight: f32,
    pub length_weight: f32,
    pub position_weight: f32,
    /// Hits scoring below this are dropped
    pub threshold: f32,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.6,
            length_weight: 0.2,
            position_weight: 0.2,
            threshold: 0.5,
        }
    }
}

/// Passages of 100-500 characters score 1.0; shorter ones scale linearly,
/// longer ones decay to 0 at 1500 characters.
pub fn length_score(text: &str) -> f32 {
    let len = text.chars().count() as f32;
    if (100.0..=500.0).contains(&len) {
        1.0
    } else if len < 100.0 {
        len / 100.0
    } else {
        (1.0 - (len - 500.0) / 1000.0).max(0.0)
    }
}

pub struct Reranker {
    config: RerankConfig,
}

impl Reranker {
    pub fn new() -> Self {
        Self {
            config: RerankConfig::default(),
        }
    }

    pub fn with_config(config: RerankConfig) -> Self {
        Self { config }
    }

    /// Rescore, drop hits under `threshold`, re-sort descending
    pub fn rerank(&self, hits: Vec<MergedHit>, _query: &str, threshold: f32) -> Vec<MergedHit> {
        let mut ranked: Vec<MergedHit> = hits
            .into_iter()
            .map(|hit| {
                let score = self.compute_score(&hit);
                MergedHit {
                    fused_score: score,
                    ..hit
                }
            })
            .filter(|hit| hit.fused_score >= threshold)
            .collect();

        ranked.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| cmp_point_ids(&a.point_id, &b.point_id))
        });

        ranked
    }

    /// Rerank with the configured threshold
    pub fn apply(&self, hits: Vec<MergedHit>, query: &str) -> Vec<MergedHit> {
        self.rerank(hits, query, self.config.threshold)
    }

    fn compute_score(&self, hit: &MergedHit) -> f32 {
        hit.fused_score * self.config.semantic_weight
            + length_score(&hit.text) * self.config.length_weight
            + self.position_score(hit) * self.config.position_weight
    }

    // TODO: derive from the passage offset once chunk positions are stored in the payload
    fn position_score(&self, _hit: &MergedHit) -> f32 {
        0.5
    }

    pub fn config(&self) -> &RerankConfig {
        &self.config
    }
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, len: usize, score: f32) -> MergedHit {
        MergedHit {
            point_id: id.to_string(),
            text: "x".repeat(len),
            fused_score: score,
        }
    }

    #[test]
    fn test_length_score_bands() {
        assert_eq!(length_score(&"a".repeat(100)), 1.0);
        assert_eq!(length_score(&"a".repeat(500)), 1.0);
        assert!((length_score(&"a".repeat(50)) - 0.5).abs() < 1e-6);
        assert!((length_score(&"a".repeat(1000)) - 0.5).abs() < 1e-6);
        assert_eq!(length_score(&"a".repeat(2000)), 0.0);
    }

    #[test]
    fn test_threshold_floor() {
        // 0.6*0.2 + 0.2*1.0 + 0.2*0.5 = 0.42
        // 0.6*0.35 + 0.2*1.0 + 0.2*0.5 = 0.51
        let ranker = Reranker::new();
        let ranked = ranker.rerank(vec![hit("1", 200, 0.2), hit("2", 200, 0.35)], "q", 0.5);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].point_id, "2");
        assert!((ranked[0].fused_score - 0.51).abs() < 1e-5);
    }

    #[test]
    fn test_rerank_sorts_descending() {
        let ranker = Reranker::new();
        let ranked = ranker.rerank(
            vec![hit("1", 20, 0.9), hit("2", 300, 0.9), hit("3", 300, 0.7)],
            "q",
            0.0,
        );
        let ids: Vec<&str> = ranked.iter().map(|h| h.point_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "1"]);
    }

    #[test]
    fn test_ties_ordered_by_point_id() {
        let ranker = Reranker::new();
        let ranked = ranker.rerank(
            vec![hit("10", 300, 0.8), hit("b", 300, 0.8), hit("2", 300, 0.8), hit("a", 300, 0.8)],
            "q",
            0.0,
        );
        let ids: Vec<&str> = ranked.iter().map(|h| h.point_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "10", "a", "b"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(Reranker::new().apply(Vec::new(), "q").is_empty());
    }
}
