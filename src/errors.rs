//! Error types for chatrag
//!
//! One taxonomy for the whole turn pipeline. Streaming paths turn these into a
//! terminal SSE error event; non-streaming paths wrap them in [`ResultDto`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for retrieval, generation and history operations
#[derive(Error, Debug)]
pub enum RagError {
    /// Missing collection or session
    #[error("{resource} not found: {name}")]
    NotFound { resource: &'static str, name: String },

    /// Embedder output does not fit the target collection
    #[error("Embedding dimension {actual} does not match collection '{collection}' dimension {expected}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// An external call exceeded its time budget
    #[error("{operation} timed out after {duration_ms}ms")]
    UpstreamTimeout {
        operation: &'static str,
        duration_ms: u64,
    },

    /// Vector store, document store or LLM reported an error
    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    /// History write failed (logged, never surfaced to a stream)
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Malformed input
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, RagError>;

impl RagError {
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        RagError::NotFound {
            resource,
            name: name.into(),
        }
    }

    pub fn timeout(operation: &'static str, duration: std::time::Duration) -> Self {
        RagError::UpstreamTimeout {
            operation,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Status code used by non-streaming results
    pub fn code(&self) -> u16 {
        match self {
            RagError::NotFound { .. } => 404,
            RagError::DimensionMismatch { .. } | RagError::ValidationError(_) => 400,
            RagError::UpstreamTimeout { .. } => 504,
            RagError::UpstreamFailure(_) => 502,
            RagError::PersistenceFailure(_)
            | RagError::Serialization(_)
            | RagError::Io(_) => 500,
        }
    }

    /// Stable tag for logs and error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::NotFound { .. } => "not_found",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::UpstreamTimeout { .. } => "upstream_timeout",
            RagError::UpstreamFailure(_) => "upstream_failure",
            RagError::PersistenceFailure(_) => "persistence_failure",
            RagError::ValidationError(_) => "validation_error",
            RagError::Serialization(_) => "serialization_error",
            RagError::Io(_) => "io_error",
        }
    }
}

/// Run `fut` under a deadline, mapping expiry to [`RagError::UpstreamTimeout`]
pub async fn with_timeout<T, F>(operation: &'static str, limit: std::time::Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| RagError::timeout(operation, limit))?
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RagError::UpstreamTimeout {
                operation: "http request",
                duration_ms: 0,
            }
        } else {
            RagError::UpstreamFailure(err.to_string())
        }
    }
}

impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        RagError::UpstreamFailure(format!("{:#}", err))
    }
}

/// Uniform result envelope for non-streaming operations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultDto<T> {
    pub success: bool,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ResultDto<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            code: 200,
            message: Some("Success".to_string()),
            data: Some(data),
        }
    }

    pub fn fail(code: u16, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T> From<Result<T>> for ResultDto<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => ResultDto::ok(data),
            Err(err) => ResultDto::fail(err.code(), err.to_string()),
        }
    }
}
