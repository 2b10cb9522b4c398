//! Shared in-process fakes for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatrag::config::Config;
use chatrag::errors::{RagError, Result};
use chatrag::memory::embedding::{EmbeddingPool, HashingEncoder};
use chatrag::memory::vector_db::InMemoryVectorStore;
use chatrag::rag::indexing::Passage;
use chatrag::rag::{DocumentIndexer, RagPipeline};
use chatrag::session::{ConversationHistoryStore, InMemorySessionRepository};
use chatrag::streaming::{Completion, CompletionRequest, StreamEvent, TokenStream};
use chatrag::types::SessionMetadata;

pub const DIMENSION: usize = 64;

/// Completion that replays fixed deltas and records every request
pub struct ScriptedCompletion {
    deltas: Vec<String>,
    hang_after: bool,
    refuse: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn replying(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            hang_after: false,
            refuse: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Emits the deltas, then never finishes
    pub fn stalling_after(deltas: &[&str]) -> Self {
        Self {
            hang_after: true,
            ..Self::replying(deltas)
        }
    }

    /// Fails before any delta
    pub fn refusing(message: &str) -> Self {
        Self {
            refuse: Some(message.to_string()),
            ..Self::replying(&[])
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(message) = &self.refuse {
            return Err(RagError::UpstreamFailure(message.clone()));
        }

        let source = futures_util::stream::iter(self.deltas.clone().into_iter().map(Ok));
        if self.hang_after {
            Ok(TokenStream::from_stream(source.chain(futures_util::stream::pending())))
        } else {
            Ok(TokenStream::from_stream(source))
        }
    }
}

pub struct Harness {
    pub pipeline: Arc<RagPipeline>,
    pub history: Arc<ConversationHistoryStore>,
    pub repository: Arc<InMemorySessionRepository>,
    pub store: Arc<InMemoryVectorStore>,
    pub indexer: Arc<DocumentIndexer>,
    pub completion: Arc<ScriptedCompletion>,
}

/// Defaults with reranking off so fused scores reach the prompt unfiltered
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.rerank.enabled = false;
    config.stream.acquire_timeout_secs = 2;
    config.stream.delta_timeout_secs = 5;
    config
}

pub fn harness(completion: ScriptedCompletion) -> Harness {
    harness_with(completion, test_config())
}

pub fn harness_with(completion: ScriptedCompletion, config: Config) -> Harness {
    let repository = Arc::new(InMemorySessionRepository::new());
    let history = Arc::new(ConversationHistoryStore::new(
        repository.clone(),
        SessionMetadata::default(),
        Duration::from_secs(5),
    ));
    let store = Arc::new(InMemoryVectorStore::new());
    let embedder = Arc::new(EmbeddingPool::new(Arc::new(HashingEncoder::new(DIMENSION)), 2));
    let completion = Arc::new(completion);

    let indexer = Arc::new(DocumentIndexer::new(
        store.clone(),
        embedder.clone(),
        &config.retrieval,
        config.timeouts.clone(),
    ));
    let pipeline = Arc::new(
        RagPipeline::new(&config, history.clone(), store.clone(), embedder, completion.clone())
            .unwrap(),
    );

    Harness {
        pipeline,
        history,
        repository,
        store,
        indexer,
        completion,
    }
}

/// `docs` collection: two passages for scope 7, one for scope 8
pub async fn seed_docs(indexer: &DocumentIndexer) {
    indexer.create_collection("docs").await.unwrap();
    indexer
        .upsert_passages(
            "docs",
            "7",
            vec![
                Passage::with_id("1", "Rust ownership rules keep memory safe"),
                Passage::with_id("2", "Python generators yield values lazily"),
            ],
        )
        .await
        .unwrap();
    indexer
        .upsert_passages(
            "docs",
            "8",
            vec![Passage::with_id("3", "Other ownership rules from another document")],
        )
        .await
        .unwrap();
}

/// Drain the receiver to the end
pub async fn collect(mut rx: tokio::sync::mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
