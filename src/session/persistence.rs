// Session repositories: JSON files on disk or an in-process map
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{RagError, Result};
use crate::types::{Session, SessionDocument};

/// Durable storage of session documents keyed by session id.
///
/// `save` is an upsert: a later write replaces the stored document for the
/// same id. It returns the storage handle, assigned on first save and kept
/// afterwards.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find(&self, session_id: &str) -> Result<Option<Session>>;

    async fn save(&self, session: &Session) -> Result<String>;

    /// `true` when something was removed
    async fn delete(&self, session_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<String>>;
}

/// Session ids end up in file names: only ASCII alphanumerics, `-` and `_`
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(RagError::ValidationError("session id is empty".to_string()));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RagError::ValidationError(format!(
            "session id '{}' may only contain letters, digits, '-' and '_'",
            session_id
        )));
    }
    Ok(())
}

fn new_handle(session: &Session) -> String {
    session
        .storage_handle
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// On-disk record: the session document plus its storage handle
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    handle: String,
    #[serde(flatten)]
    document: SessionDocument,
}

/// One `session_<id>.json` file per session
pub struct FileSessionRepository {
    storage_dir: PathBuf,
}

impl FileSessionRepository {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        std::fs::create_dir_all(&storage_dir).map_err(|e| {
            RagError::PersistenceFailure(format!(
                "Failed to create session storage directory {}: {}",
                storage_dir.display(),
                e
            ))
        })?;
        Ok(Self { storage_dir })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.storage_dir.join(format!("session_{}.json", session_id)))
    }
}

fn persistence(context: &str, err: impl std::fmt::Display) -> RagError {
    RagError::PersistenceFailure(format!("{}: {}", context, err))
}

#[async_trait]
impl SessionRepository for FileSessionRepository {
    async fn find(&self, session_id: &str) -> Result<Option<Session>> {
        let path = self.path_for(session_id)?;

        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persistence("Failed to read session file", e)),
        };

        let stored: StoredSession =
            serde_json::from_str(&json).map_err(|e| persistence("Failed to deserialize session", e))?;

        Ok(Some(Session::from_document(stored.document, Some(stored.handle))))
    }

    async fn save(&self, session: &Session) -> Result<String> {
        let path = self.path_for(&session.id)?;
        let handle = new_handle(session);

        let json = serde_json::to_string_pretty(&StoredSession {
            handle: handle.clone(),
            document: session.to_document(),
        })
        .map_err(|e| persistence("Failed to serialize session", e))?;

        // Write then rename so readers never see a partial document. Each
        // write gets its own temp file since saves of one session may overlap.
        let tmp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(persistence("Failed to write session file", e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(persistence("Failed to replace session file", e));
        }

        Ok(handle)
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        let path = self.path_for(session_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(persistence("Failed to delete session file", e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.storage_dir)
            .await
            .map_err(|e| persistence("Failed to read session directory", e))?;

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| persistence("Failed to read session directory", e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = name
                    .strip_prefix("session_")
                    .and_then(|rest| rest.strip_suffix(".json"))
                {
                    ids.push(id.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Map-backed repository
#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, (String, SessionDocument)>>,
    saves: AtomicUsize,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|(handle, doc)| Session::from_document(doc.clone(), Some(handle.clone()))))
    }

    async fn save(&self, session: &Session) -> Result<String> {
        let handle = new_handle(session);
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), (handle.clone(), session.to_document()));
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(handle)
    }

    async fn delete(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.write().await.remove(session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
