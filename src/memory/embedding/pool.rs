//! Fixed-size worker pool for CPU-bound embedding work
//!
//! - Concurrency bounded by a semaphore (one permit per worker)
//! - Work runs on tokio's blocking threads, tracked for shutdown
//! - `shutdown` refuses new work and waits for in-flight encodes

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::{Embedder, TextEncoder};
use crate::errors::{RagError, Result};

pub struct EmbeddingPool {
    encoder: Arc<dyn TextEncoder>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    workers: usize,
}

impl EmbeddingPool {
    pub fn new(encoder: Arc<dyn TextEncoder>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            encoder,
            permits: Arc::new(Semaphore::new(workers)),
            tracker: TaskTracker::new(),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of encodes currently running or queued on a worker
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let shut_down = || RagError::UpstreamFailure("embedding pool is shut down".to_string());
        if self.tracker.is_closed() {
            return Err(shut_down());
        }

        // Counted by the tracker from here on, so `shutdown` waits for a
        // caller that holds a permit but has not spawned yet. Permits close
        // before the tracker does, so a late caller fails to acquire.
        let token = self.tracker.token();
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| shut_down())?;

        let encoder = Arc::clone(&self.encoder);
        let handle = self.tracker.spawn_blocking(move || {
            let _permit = permit;
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            encoder.encode_batch(&refs)
        });
        drop(token);

        let vectors = handle
            .await
            .map_err(|e| RagError::UpstreamFailure(format!("embedding worker failed: {}", e)))??;

        Ok(vectors)
    }

    /// Stop accepting work and wait for in-flight encodes to finish
    pub async fn shutdown(&self) {
        self.permits.close();
        self.tracker.close();
        debug!(in_flight = self.tracker.len(), "Draining embedding pool");
        self.tracker.wait().await;
    }
}

#[async_trait]
impl Embedder for EmbeddingPool {
    fn dimension(&self) -> usize {
        self.encoder.dimension()
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.run(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| RagError::UpstreamFailure("encoder returned no vector".to_string()))
    }

    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.run(texts.to_vec()).await
    }
}
