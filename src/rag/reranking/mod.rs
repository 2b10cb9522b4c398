//! Secondary scoring pass over fused hits
pub mod scorer;

pub use scorer::{length_score, RerankConfig, Reranker};
