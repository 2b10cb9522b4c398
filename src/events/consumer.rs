//! Deletion event consumer
//!
//! Accepts one JSON payload per event:
//!
//! - `{"session_id": "..."}` (also `sessionId` / `SessionId`, string or
//!   number): drop a conversation history
//! - `{"collection": "...", "scope_id": "..."}`: drop every passage of one
//!   source document
//!
//! Deletes are idempotent and retried on transient failures. Anything that
//! cannot be handled is dead-lettered with a reason.

use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use super::retry::RetryPolicy;
use crate::errors::{RagError, Result};
use crate::rag::indexing::DocumentIndexer;
use crate::session::ConversationHistoryStore;

const SESSION_ID_KEYS: [&str; 3] = ["session_id", "sessionId", "SessionId"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionEvent {
    Session(String),
    Document { collection: String, scope_id: String },
}

/// What the transport should do with the message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerOutcome {
    Acknowledged,
    DeadLettered(String),
}

fn non_empty_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// String or numeric id, rendered as a string
fn id_str(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_event(payload: &[u8]) -> Result<DeletionEvent> {
    let value: Value = serde_json::from_slice(payload)?;
    if !value.is_object() {
        return Err(RagError::ValidationError("payload is not a JSON object".to_string()));
    }

    if let Some(id) = SESSION_ID_KEYS.iter().find_map(|key| id_str(&value, key)) {
        return Ok(DeletionEvent::Session(id));
    }

    match (non_empty_str(&value, "collection"), id_str(&value, "scope_id")) {
        (Some(collection), Some(scope_id)) => Ok(DeletionEvent::Document {
            collection: collection.to_string(),
            scope_id,
        }),
        _ => Err(RagError::ValidationError("message missing session_id".to_string())),
    }
}

pub struct DeletionConsumer {
    history: Arc<ConversationHistoryStore>,
    indexer: Option<Arc<DocumentIndexer>>,
    retry: RetryPolicy,
}

impl DeletionConsumer {
    pub fn new(history: Arc<ConversationHistoryStore>, indexer: Option<Arc<DocumentIndexer>>) -> Self {
        Self::with_retry(history, indexer, RetryPolicy::new())
    }

    pub fn with_retry(
        history: Arc<ConversationHistoryStore>,
        indexer: Option<Arc<DocumentIndexer>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            history,
            indexer,
            retry,
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> ConsumerOutcome {
        let event = match parse_event(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Rejecting deletion event");
                return ConsumerOutcome::DeadLettered(e.to_string());
            }
        };

        match self.apply(&event).await {
            Ok(()) => {
                info!(event = ?event, "Deletion event handled");
                ConsumerOutcome::Acknowledged
            }
            Err(e) => {
                error!(event = ?event, error = %e, "Deletion event failed");
                ConsumerOutcome::DeadLettered(e.to_string())
            }
        }
    }

    async fn apply(&self, event: &DeletionEvent) -> Result<()> {
        match event {
            DeletionEvent::Session(session_id) => {
                self.retry.run(|| self.history.delete(session_id)).await
            }
            DeletionEvent::Document { collection, scope_id } => {
                let indexer = self.indexer.as_ref().ok_or_else(|| {
                    RagError::ValidationError("document deletion is not configured".to_string())
                })?;
                self.retry
                    .run(|| indexer.delete_document(collection, scope_id))
                    .await
            }
        }
    }
}
