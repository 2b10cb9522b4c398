//! Streaming module
//!
//! Completion backends, the NDJSON frame parser, SSE event frames and the
//! orchestrator that drives a generation to exactly one terminal event.

pub mod client;
pub mod orchestrator;
pub mod parser;
pub mod sse;

// Re-export commonly used types
pub use client::{Completion, CompletionRequest, OllamaClient, TokenStream, DEFAULT_MODEL, DEFAULT_OLLAMA_URL};
pub use orchestrator::{
    OrchestratorConfig, StreamOrchestrator, StreamOutcome, StreamPhase, StreamState, StreamTerminal,
};
pub use parser::{ChatChunk, JsonParser, MAX_BUFFER_SIZE};
pub use sse::{StreamEvent, SSE_HEADERS};
