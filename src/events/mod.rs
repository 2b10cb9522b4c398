//! Inbound deletion events

pub mod consumer;
pub mod retry;

pub use consumer::{parse_event, ConsumerOutcome, DeletionConsumer, DeletionEvent};
pub use retry::{is_retryable, RetryPolicy};
