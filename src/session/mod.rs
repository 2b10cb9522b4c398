// Conversation history: session lifecycle and durable storage
//
// Components:
// - History Store: fetch-or-create, append, finalize, delete
// - Persistence: repositories holding session documents
// - Save Tracker: registry of detached saves, drained at shutdown

pub mod history;
pub mod persistence;
pub mod tracker;

pub use history::ConversationHistoryStore;
pub use persistence::{
    validate_session_id, FileSessionRepository, InMemorySessionRepository, SessionRepository,
};
pub use tracker::SaveTracker;
