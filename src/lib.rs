//! chatrag - retrieval-augmented conversational turns
//!
//! Answers a user message by combining vector similarity and keyword overlap
//! over an indexed collection, building a prompt from the best passages and
//! the session history, and streaming the model's reply as it is generated.
//!
//! # Architecture
//!
//! - **memory**: embedding workers and vector stores
//! - **rag**: retrieval, fusion, reranking, prompt context, indexing and the turn pipeline
//! - **session**: conversation history and its persistence
//! - **streaming**: completion backends, frame parsing and the stream orchestrator
//! - **events**: inbound deletion events

pub mod errors;
pub mod types;

pub mod config;
pub mod logging;

pub mod memory;
pub mod rag;
pub mod session;
pub mod streaming;

pub mod events;

pub mod cli;

// Re-export commonly used types
pub use errors::{RagError, Result, ResultDto};
pub use rag::{DocumentIndexer, RagPipeline, TurnRequest};
pub use session::ConversationHistoryStore;
pub use streaming::{StreamEvent, StreamOutcome, StreamTerminal};
