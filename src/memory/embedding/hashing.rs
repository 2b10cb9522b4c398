//! Feature-hashing bag-of-words encoder.
//!
//! No model download, fully deterministic. Used for offline runs and tests.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::{l2_normalize, TextEncoder};

#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl TextEncoder for HashingEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_text_same_vector() {
        let encoder = HashingEncoder::new(64);
        let v = encoder.encode_batch(&["rust async", "Rust  ASYNC"]).unwrap();
        assert_eq!(v[0], v[1]);
        assert_eq!(v[0].len(), 64);
    }

    #[test]
    fn test_empty_text_is_zero() {
        let encoder = HashingEncoder::new(8);
        let v = encoder.encode_batch(&[""]).unwrap();
        assert!(v[0].iter().all(|x| *x == 0.0));
    }
}
