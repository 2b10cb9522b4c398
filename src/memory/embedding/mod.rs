//! Text embedding
//!
//! `TextEncoder` is the synchronous, CPU-bound model. `Embedder` is the async
//! contract the retrievers consume; [`EmbeddingPool`] bridges the two by
//! running encoders on a bounded set of blocking workers.

pub mod engine;
pub mod hashing;
pub mod pool;

use async_trait::async_trait;

use crate::errors::Result;

pub use engine::BertEncoder;
pub use hashing::HashingEncoder;
pub use pool::EmbeddingPool;

/// Synchronous sentence encoder
pub trait TextEncoder: Send + Sync + 'static {
    /// Output vector length
    fn dimension(&self) -> usize;

    /// Encode several texts in one pass
    fn encode_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Async embedding contract used by retrieval and indexing
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn encode(&self, text: &str) -> Result<Vec<f32>>;

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.encode(text).await?);
        }
        Ok(vectors)
    }
}

/// Scale a vector to unit length in place (zero vectors are left alone)
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
