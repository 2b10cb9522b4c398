//! Registry of detached history saves.
//!
//! Saves are spawned here instead of on the request task so that a client
//! disconnect never aborts them. [`SaveTracker::drain`] is the shutdown
//! barrier.

use std::future::Future;
use tokio_util::task::TaskTracker;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SaveTracker {
    tracker: TaskTracker,
}

impl SaveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&self, save: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(save);
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every save spawned so far, then accept new ones again
    pub async fn drain(&self) {
        debug!(in_flight = self.tracker.len(), "Draining history saves");
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
