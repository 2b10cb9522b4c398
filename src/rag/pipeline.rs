// End-to-end turn pipeline: history -> hybrid retrieval -> prompt -> stream -> finalize
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ArticleSettings, Config};
use crate::errors::{RagError, Result, ResultDto};
use crate::memory::embedding::Embedder;
use crate::memory::vector_db::VectorStore;
use crate::rag::context::{augment, AssembledContext, ContextBuilder, PromptTemplates, TurnKind};
use crate::rag::fusion::{FusionWeights, MergedHit, ResultFusion};
use crate::rag::reranking::{RerankConfig, Reranker};
use crate::rag::retrieval::{KeywordRetriever, VectorRetriever};
use crate::session::{validate_session_id, ConversationHistoryStore};
use crate::streaming::orchestrator::{deliver, Flush};
use crate::streaming::{
    Completion, CompletionRequest, OrchestratorConfig, StreamEvent, StreamOrchestrator,
    StreamOutcome, StreamTerminal,
};
use crate::types::{ChatMessage, Role, Session};

/// One conversational turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub owner_id: String,
    pub kind: TurnKind,
    /// Collection to retrieve from; no retrieval when absent
    pub collection: Option<String>,
    /// Restricts retrieval to one source document
    pub scope_id: Option<String>,
}

impl TurnRequest {
    pub fn chat(session_id: &str, owner_id: &str, message: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            kind: TurnKind::Chat {
                message: message.to_string(),
            },
            collection: None,
            scope_id: None,
        }
    }

    pub fn summary(session_id: &str, owner_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            owner_id: owner_id.to_string(),
            kind: TurnKind::Summary,
            collection: None,
            scope_id: None,
        }
    }

    /// Stateless article generation; no session is read or written
    pub fn article(owner_id: &str, prompt: &str) -> Self {
        Self {
            session_id: String::new(),
            owner_id: owner_id.to_string(),
            kind: TurnKind::Article {
                prompt: prompt.to_string(),
            },
            collection: None,
            scope_id: None,
        }
    }

    pub fn with_collection(mut self, collection: &str, scope_id: Option<&str>) -> Self {
        self.collection = Some(collection.to_string());
        self.scope_id = scope_id.map(str::to_string);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.kind.is_stateless() {
            validate_session_id(&self.session_id)?;
        }
        if self.owner_id.trim().is_empty() {
            return Err(RagError::ValidationError("owner id is empty".to_string()));
        }
        match &self.kind {
            TurnKind::Chat { message } if message.trim().is_empty() => {
                return Err(RagError::ValidationError("message is empty".to_string()));
            }
            TurnKind::Article { prompt } if prompt.trim().is_empty() => {
                return Err(RagError::ValidationError("article prompt is empty".to_string()));
            }
            TurnKind::Article { .. } if self.collection.is_some() => {
                return Err(RagError::ValidationError(
                    "article turns do not retrieve from a collection".to_string(),
                ));
            }
            TurnKind::Summary if self.collection.is_some() && self.scope_id.is_none() => {
                return Err(RagError::ValidationError(
                    "summary turns need the scope id of the document to summarize".to_string(),
                ));
            }
            _ => {}
        }
        if self.scope_id.is_some() && self.collection.is_none() {
            return Err(RagError::ValidationError(
                "scope id given without a collection".to_string(),
            ));
        }
        if matches!(&self.collection, Some(c) if c.trim().is_empty()) {
            return Err(RagError::ValidationError("collection name is empty".to_string()));
        }
        Ok(())
    }
}

/// Passages selected for a turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub hits: Vec<MergedHit>,
    pub context: AssembledContext,
    pub vector_hits: usize,
    pub keyword_hits: usize,
}

/// Non-streaming turn result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnAnswer {
    pub session_id: String,
    pub response: String,
}

pub struct RagPipeline {
    history: Arc<ConversationHistoryStore>,
    vector: VectorRetriever,
    keyword: KeywordRetriever,
    fusion: ResultFusion,
    reranker: Option<Reranker>,
    context_builder: ContextBuilder,
    templates: PromptTemplates,
    orchestrator: StreamOrchestrator,
    use_keyword_search: bool,
    channel_capacity: usize,
    article: ArticleSettings,
}

impl RagPipeline {
    pub fn new(
        config: &Config,
        history: Arc<ConversationHistoryStore>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn Completion>,
    ) -> Result<Self> {
        let retrieval = &config.retrieval;
        let weights = FusionWeights::new(retrieval.alpha, retrieval.beta)?;

        let reranker = config.rerank.enabled.then(|| {
            Reranker::with_config(RerankConfig {
                threshold: config.rerank.threshold,
                ..Default::default()
            })
        });

        Ok(Self {
            history,
            vector: VectorRetriever::new(
                Arc::clone(&store),
                embedder,
                retrieval.clone(),
                config.timeouts.clone(),
            ),
            keyword: KeywordRetriever::new(store, retrieval.clone(), config.timeouts.clone()),
            fusion: ResultFusion::new(weights, retrieval.limit),
            reranker,
            context_builder: ContextBuilder::new(),
            templates: PromptTemplates,
            orchestrator: StreamOrchestrator::new(completion, OrchestratorConfig::from(&config.stream)),
            use_keyword_search: retrieval.use_keyword_search,
            channel_capacity: config.stream.channel_capacity.max(1),
            article: config.article.clone(),
        })
    }

    pub fn history(&self) -> &Arc<ConversationHistoryStore> {
        &self.history
    }

    /// Hybrid retrieval: both retrievers run concurrently, either failing
    /// fails the step
    pub async fn retrieve(
        &self,
        collection: &str,
        query: &str,
        scope_id: Option<&str>,
    ) -> Result<RetrievedContext> {
        let limit = self.fusion.limit();
        let (vector_hits, keyword_hits) = if self.use_keyword_search {
            tokio::try_join!(
                self.vector.search(collection, query, scope_id, limit),
                self.keyword.search(collection, query, scope_id),
            )?
        } else {
            (self.vector.search(collection, query, scope_id, limit).await?, Vec::new())
        };

        let merged = self.fusion.merge(&vector_hits, &keyword_hits);
        let hits = match &self.reranker {
            Some(reranker) => reranker.apply(merged, query),
            None => merged,
        };
        let context = self.context_builder.build(&hits);

        debug!(
            collection,
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            kept = hits.len(),
            "Retrieval complete"
        );

        Ok(RetrievedContext {
            vector_hits: vector_hits.len(),
            keyword_hits: keyword_hits.len(),
            hits,
            context,
        })
    }

    /// Every passage of one document as context, for summaries
    pub async fn document_context(&self, collection: &str, scope_id: &str) -> Result<AssembledContext> {
        let passages = self.keyword.document_passages(collection, scope_id).await?;
        Ok(self.context_builder.whole_document(&passages))
    }

    /// Validate, load or create the session and append the user message
    async fn open_session(&self, request: &TurnRequest) -> Result<Session> {
        request.validate()?;
        let mut session = self
            .history
            .get_or_create(&request.session_id, &request.owner_id, None)
            .await?;
        if let Some(message) = request.kind.user_message() {
            self.history.append(&mut session, message, Role::User)?;
        }
        Ok(session)
    }

    async fn compose(&self, request: &TurnRequest, session: &Session) -> Result<CompletionRequest> {
        let scope_id = request.scope_id.as_deref();
        let context = match (&request.collection, request.kind.query(), scope_id) {
            (Some(collection), Some(query), _) => {
                self.retrieve(collection, query, scope_id).await?.context
            }
            (Some(collection), None, Some(scope_id)) => {
                self.document_context(collection, scope_id).await?
            }
            _ => AssembledContext::default(),
        };

        let system_prompt = request.kind.system_prompt(&self.templates, &context);
        Ok(CompletionRequest {
            messages: augment(system_prompt, session.messages()),
            max_tokens: session.metadata.max_tokens,
            temperature: session.metadata.temperature,
        })
    }

    /// Run one turn, emitting events until exactly one terminal event.
    ///
    /// Once a session exists it is finalized exactly once, with whatever text
    /// reached the consumer.
    pub async fn handle_turn(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        info!(session_id = %request.session_id, collection = ?request.collection, "Turn started");

        if request.kind.is_stateless() {
            return self.handle_stateless(request, events, cancel).await;
        }

        let session = match self.open_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(session_id = %request.session_id, error = %e, "Turn rejected");
                return fail(e, &events, &cancel).await;
            }
        };

        let composed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = events.closed() => None,
            composed = self.compose(&request, &session) => Some(composed),
        };

        let completion = match composed {
            Some(Ok(completion)) => completion,
            Some(Err(e)) => {
                warn!(session_id = %request.session_id, error = %e, "Retrieval failed");
                self.history.finalize(session, "");
                return fail(e, &events, &cancel).await;
            }
            None => {
                self.history.finalize(session, "");
                return StreamOutcome {
                    terminal: StreamTerminal::Cancelled,
                    full_response: String::new(),
                };
            }
        };

        let history = &self.history;
        self.orchestrator
            .run(completion, &events, &cancel, move |outcome| {
                history.finalize(session, &outcome.full_response)
            })
            .await
    }

    /// Article generation: `[system(article writer), user(prompt)]`, nothing
    /// loaded or saved
    async fn handle_stateless(
        &self,
        request: TurnRequest,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        if let Err(e) = request.validate() {
            warn!(owner_id = %request.owner_id, error = %e, "Turn rejected");
            return fail(e, &events, &cancel).await;
        }

        let system_prompt = request
            .kind
            .system_prompt(&self.templates, &AssembledContext::default());
        let mut messages = vec![ChatMessage::system(system_prompt)];
        if let Some(prompt) = request.kind.user_message() {
            messages.push(ChatMessage::new(Role::User, prompt));
        }

        let completion = CompletionRequest {
            messages,
            max_tokens: self.article.max_tokens,
            temperature: self.article.temperature,
        };
        self.orchestrator.run(completion, &events, &cancel, |_| {}).await
    }

    /// Spawn a turn and hand back its event stream
    pub fn stream_turn(
        self: &Arc<Self>,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<StreamEvent>, JoinHandle<StreamOutcome>) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let pipeline = Arc::clone(self);
        let task = tokio::spawn(async move { pipeline.handle_turn(request, tx, cancel).await });
        (rx, task)
    }

    /// Run a turn to completion and return the whole answer
    pub async fn answer_turn(&self, request: TurnRequest) -> ResultDto<TurnAnswer> {
        let session_id = request.session_id.clone();
        let (tx, mut rx) = mpsc::channel(self.channel_capacity);

        let collect = async {
            let mut text = String::new();
            while let Some(event) = rx.recv().await {
                if let StreamEvent::Content(chunk) = event {
                    text.push_str(&chunk);
                }
            }
            text
        };
        let (outcome, response) = tokio::join!(
            self.handle_turn(request, tx, CancellationToken::new()),
            collect
        );

        match outcome.terminal {
            StreamTerminal::Completed => ResultDto::ok(TurnAnswer {
                session_id,
                response,
            }),
            StreamTerminal::Errored { code, message } => ResultDto::fail(code, message),
            StreamTerminal::Cancelled => ResultDto::fail(500, "turn was cancelled"),
        }
    }
}

/// Terminal error frame for a turn that never reached the orchestrator
async fn fail(
    err: RagError,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> StreamOutcome {
    let terminal = match deliver(StreamEvent::Error(err.to_string()), events, cancel).await {
        Flush::Sent => StreamTerminal::from_error(&err),
        Flush::Disconnected => StreamTerminal::Cancelled,
    };
    StreamOutcome {
        terminal,
        full_response: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_chat_request() {
        assert!(TurnRequest::chat("s-1", "u1", "hello").validate().is_ok());
        assert!(TurnRequest::chat("s-1", "u1", "   ").validate().is_err());
        assert!(TurnRequest::chat("", "u1", "hi").validate().is_err());
        assert!(TurnRequest::chat("s 1", "u1", "hi").validate().is_err());
        assert!(TurnRequest::chat("s1", "", "hi").validate().is_err());
    }

    #[test]
    fn test_validate_scope_requires_collection() {
        let mut request = TurnRequest::summary("s1", "u1");
        request.scope_id = Some("7".to_string());
        assert!(matches!(request.validate(), Err(RagError::ValidationError(_))));

        let request = TurnRequest::summary("s1", "u1").with_collection("articles", Some("7"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validate_article_request() {
        assert!(TurnRequest::article("u1", "Write about tides").validate().is_ok());
        assert!(TurnRequest::article("u1", "  ").validate().is_err());
        assert!(TurnRequest::article("u1", "tides")
            .with_collection("docs", None)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_summary_needs_scope() {
        let request = TurnRequest::summary("s1", "u1").with_collection("articles", None);
        assert!(matches!(request.validate(), Err(RagError::ValidationError(_))));
        assert!(TurnRequest::summary("s1", "u1").validate().is_ok());
    }

    #[test]
    fn test_turn_request_serde() {
        let request = TurnRequest::chat("s1", "u1", "hi").with_collection("docs", None);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"]["type"], "chat");
        assert_eq!(json["kind"]["message"], "hi");

        let back: TurnRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }
}
