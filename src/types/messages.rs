//! Conversation message types
//!
//! `Message` is the persisted, timestamped history entry. `ChatMessage` is the
//! role/content pair handed to the completion backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of a session timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message stamped with the current time.
    ///
    /// Content is trimmed the same way it is stored.
    pub fn new(role: Role, content: &str) -> Self {
        Self::at(role, content, Utc::now())
    }

    pub fn at(role: Role, content: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            role,
            content: content.trim().to_string(),
            created_at,
        }
    }

    /// Heuristic: 1 token ≈ 4 characters
    pub fn estimate_tokens(&self) -> usize {
        self.content.chars().count() / 4
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Message as sent to the completion backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}
