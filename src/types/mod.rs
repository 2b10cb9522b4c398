//! Type definitions module
//!
//! Conversation messages and the session they belong to.

pub mod messages;
pub mod session;

// Re-export commonly used types
pub use messages::{ChatMessage, Message, Role};
pub use session::{Session, SessionDocument, SessionMetadata, SessionState};
