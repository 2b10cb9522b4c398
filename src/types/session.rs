//! Session model and its lifecycle states
//!
//! A session is the only state shared across turns. Its messages are an
//! append-only timeline: timestamps never go backwards and entries are never
//! edited once pushed.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::{RagError, Result};
use crate::types::messages::{Message, Role};

/// Generation settings stored alongside the conversation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub temperature: f32,
    #[serde(rename = "maxTokens")]
    pub max_tokens: u32,
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 3000,
        }
    }
}

/// Lifecycle of an in-memory session value.
///
/// `absent` is not represented: it is the absence of a `Session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Built from scratch this turn, never stored
    Created,
    /// Loaded from storage or appended to this turn
    Active,
    /// Assistant reply appended and save scheduled (terminal)
    Finalized,
}

/// A conversation keyed by an externally supplied id
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub owner_id: String,
    messages: Vec<Message>,
    pub metadata: SessionMetadata,
    /// Opaque id assigned by the repository on first save
    pub storage_handle: Option<String>,
    state: SessionState,
}

impl Session {
    /// Fresh session seeded with a system message
    pub fn create(id: &str, owner_id: &str, system_prompt: &str, metadata: SessionMetadata) -> Self {
        Self {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            messages: vec![Message::new(Role::System, system_prompt)],
            metadata,
            storage_handle: None,
            state: SessionState::Created,
        }
    }

    /// Rebuild a session from its stored document
    pub fn from_document(document: SessionDocument, storage_handle: Option<String>) -> Self {
        Self {
            id: document.session_id,
            owner_id: document.owner_id,
            messages: document.messages,
            metadata: document.metadata,
            storage_handle,
            state: SessionState::Active,
        }
    }

    pub fn to_document(&self) -> SessionDocument {
        SessionDocument {
            session_id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            messages: self.messages.clone(),
            metadata: self.metadata,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Push a message, keeping the timeline monotonic.
    ///
    /// Valid from `Created` or `Active`; moves to `Active`.
    pub fn push(&mut self, role: Role, content: &str) -> Result<()> {
        if self.state == SessionState::Finalized {
            return Err(RagError::ValidationError(format!(
                "session {} is finalized and no longer accepts messages",
                self.id
            )));
        }
        self.push_monotonic(role, content);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Append the assistant reply (if any) and seal the session.
    ///
    /// Valid from `Created` or `Active`; moves to `Finalized`.
    pub fn seal(&mut self, full_response: &str) -> Result<()> {
        if self.state == SessionState::Finalized {
            return Err(RagError::ValidationError(format!(
                "session {} was already finalized",
                self.id
            )));
        }
        if !full_response.trim().is_empty() {
            self.push_monotonic(Role::Assistant, full_response);
        }
        self.state = SessionState::Finalized;
        Ok(())
    }

    fn push_monotonic(&mut self, role: Role, content: &str) {
        let now = Utc::now();
        let created_at = match self.messages.last() {
            Some(last) if last.created_at > now => last.created_at,
            _ => now,
        };
        self.messages.push(Message::at(role, content, created_at));
    }
}

/// Persisted shape of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "ownerId")]
    pub owner_id: String,
    pub messages: Vec<Message>,
    pub metadata: SessionMetadata,
}
