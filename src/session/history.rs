//! Conversation history store
//!
//! Owns the session lifecycle for a turn:
//!
//! - `get_or_create`: load the stored session or seed a new one
//! - `append`: in-memory only
//! - `finalize`: append the reply and schedule a detached save whose outcome
//!   is logged, never retried and never surfaced to the caller
//! - `delete`: idempotent
//!
//! Concurrent turns on the same session id are not serialized; the last
//! save wins.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::persistence::{validate_session_id, SessionRepository};
use super::tracker::SaveTracker;
use crate::errors::{RagError, Result};
use crate::rag::context::PromptTemplates;
use crate::types::{Role, Session, SessionMetadata};

pub struct ConversationHistoryStore {
    repository: Arc<dyn SessionRepository>,
    templates: PromptTemplates,
    defaults: SessionMetadata,
    saves: SaveTracker,
    save_timeout: Duration,
}

impl ConversationHistoryStore {
    pub fn new(repository: Arc<dyn SessionRepository>, defaults: SessionMetadata, save_timeout: Duration) -> Self {
        Self {
            repository,
            templates: PromptTemplates,
            defaults,
            saves: SaveTracker::new(),
            save_timeout,
        }
    }

    /// Load the session or create one seeded with the system prompt.
    ///
    /// A non-blank `first_message` is appended as a user message to a newly
    /// created session only.
    pub async fn get_or_create(
        &self,
        session_id: &str,
        owner_id: &str,
        first_message: Option<&str>,
    ) -> Result<Session> {
        if let Some(session) = self.repository.find(session_id).await? {
            debug!(session_id, messages = session.messages().len(), "Loaded session");
            return Ok(session);
        }

        let mut session = Session::create(
            session_id,
            owner_id,
            &self.templates.general_assistant(),
            self.defaults,
        );
        if let Some(message) = first_message.filter(|m| !m.trim().is_empty()) {
            session.push(Role::User, message)?;
        }

        debug!(session_id, owner_id, "Created session");
        Ok(session)
    }

    pub fn append(&self, session: &mut Session, content: &str, role: Role) -> Result<()> {
        session.push(role, content)
    }

    /// Seal the session and schedule its save.
    ///
    /// Takes the session by value so a turn cannot finalize twice. Returns
    /// once the save is scheduled.
    pub fn finalize(&self, mut session: Session, full_response: &str) {
        if let Err(e) = session.seal(full_response) {
            warn!(session_id = %session.id, error = %e, "Refusing to finalize session");
            return;
        }

        let repository = Arc::clone(&self.repository);
        let limit = self.save_timeout;
        self.saves.spawn(async move {
            let session_id = session.id.clone();
            match tokio::time::timeout(limit, repository.save(&session)).await {
                Ok(Ok(handle)) => {
                    info!(
                        session_id = %session_id,
                        handle = %handle,
                        messages = session.messages().len(),
                        "Session saved"
                    );
                }
                Ok(Err(e)) => {
                    error!(session_id = %session_id, error = %e, "Session save failed");
                }
                Err(_) => {
                    error!(
                        session_id = %session_id,
                        timeout_ms = limit.as_millis() as u64,
                        "Session save timed out"
                    );
                }
            }
        });
    }

    /// Stored session or `NotFound`
    pub async fn fetch(&self, session_id: &str) -> Result<Session> {
        self.repository
            .find(session_id)
            .await?
            .ok_or_else(|| RagError::not_found("session", session_id))
    }

    /// Remove the stored session; absent ids are not an error
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let removed = self.repository.delete(session_id).await?;
        info!(session_id, removed, "Session deleted");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        self.repository.list().await
    }

    pub fn pending_saves(&self) -> usize {
        self.saves.in_flight()
    }

    /// Wait for all scheduled saves
    pub async fn drain(&self) {
        self.saves.drain().await;
    }
}
