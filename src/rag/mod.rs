// Retrieval-augmented turns
//
// Components:
// - Retrieval: vector similarity and keyword overlap over a collection
// - Fusion: weighted merge of both hit lists
// - Re-ranking: optional rescoring and threshold filter
// - Context: numbered sources and prompt templates
// - Indexing: collection setup and passage upserts
// - Pipeline: end-to-end streaming turn

pub mod context;
pub mod fusion;
pub mod indexing;
pub mod pipeline;
pub mod reranking;
pub mod retrieval;

// Re-export key types
pub use context::{AssembledContext, ContextBuilder, PromptTemplates, TurnKind};
pub use fusion::{merge, FusionWeights, MergedHit, ResultFusion};
pub use indexing::{DocumentIndexer, Passage};
pub use pipeline::{RagPipeline, RetrievedContext, TurnAnswer, TurnRequest};
pub use reranking::Reranker;
pub use retrieval::{HitSource, KeywordRetriever, QueryExpander, RetrievalHit, VectorRetriever};
