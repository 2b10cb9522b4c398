//! Stream orchestrator
//!
//! Drives one generation into a channel of [`StreamEvent`]s:
//!
//! ```text
//! Init -> Requesting -> Streaming -> Completed | Errored | Cancelled
//!            \-----------------------> Errored | Cancelled
//! ```
//!
//! Every path ends in exactly one terminal phase and calls the terminal
//! callback exactly once. After a cancellation nothing more is emitted.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{Completion, CompletionRequest, TokenStream};
use super::sse::StreamEvent;
use crate::config::StreamSettings;
use crate::errors::RagError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamPhase {
    Init,
    Requesting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl StreamPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamPhase::Completed | StreamPhase::Errored | StreamPhase::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: StreamPhase) -> bool {
        use StreamPhase::*;
        matches!(
            (self, next),
            (Init, Requesting)
                | (Requesting, Streaming)
                | (Requesting, Errored)
                | (Requesting, Cancelled)
                | (Streaming, Completed)
                | (Streaming, Errored)
                | (Streaming, Cancelled)
        )
    }
}

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTerminal {
    Completed,
    /// `code` follows [`RagError::code`]
    Errored { code: u16, message: String },
    Cancelled,
}

impl StreamTerminal {
    pub fn from_error(err: &RagError) -> Self {
        StreamTerminal::Errored {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Result of a streamed generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub terminal: StreamTerminal,
    /// Every delta the consumer actually received, concatenated
    pub full_response: String,
}

/// Per-turn state, owned by a single `run`
#[derive(Debug)]
pub struct StreamState {
    phase: StreamPhase,
    buffer: String,
    full_response: String,
}

impl StreamState {
    fn new() -> Self {
        Self {
            phase: StreamPhase::Init,
            buffer: String::new(),
            full_response: String::new(),
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    fn advance(&mut self, next: StreamPhase) {
        if self.phase.can_transition_to(next) {
            self.phase = next;
        } else {
            warn!(from = ?self.phase, to = ?next, "Ignoring invalid stream transition");
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub acquire_timeout: Duration,
    pub delta_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            delta_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&StreamSettings> for OrchestratorConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            acquire_timeout: Duration::from_secs(settings.acquire_timeout_secs),
            delta_timeout: Duration::from_secs(settings.delta_timeout_secs),
        }
    }
}

pub(crate) enum Flush {
    Sent,
    Disconnected,
}

pub struct StreamOrchestrator {
    completion: Arc<dyn Completion>,
    config: OrchestratorConfig,
}

impl StreamOrchestrator {
    pub fn new(completion: Arc<dyn Completion>, config: OrchestratorConfig) -> Self {
        Self { completion, config }
    }

    /// Stream one generation into `events`.
    ///
    /// The consumer is considered gone when `cancel` fires or the receiving
    /// side of `events` is dropped. `on_terminal` runs once with the outcome
    /// before it is returned.
    pub async fn run<F>(
        &self,
        request: CompletionRequest,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
        on_terminal: F,
    ) -> StreamOutcome
    where
        F: FnOnce(&StreamOutcome),
    {
        let mut state = StreamState::new();
        state.advance(StreamPhase::Requesting);

        let terminal = match self.acquire(request, events, cancel).await {
            Ok(tokens) => {
                state.advance(StreamPhase::Streaming);
                self.pump(tokens, &mut state, events, cancel).await
            }
            Err(terminal) => terminal,
        };

        state.advance(match terminal {
            StreamTerminal::Completed => StreamPhase::Completed,
            StreamTerminal::Errored { .. } => StreamPhase::Errored,
            StreamTerminal::Cancelled => StreamPhase::Cancelled,
        });

        let outcome = StreamOutcome {
            terminal,
            full_response: state.full_response,
        };
        info!(
            terminal = ?outcome.terminal,
            chars = outcome.full_response.len(),
            "Stream finished"
        );
        on_terminal(&outcome);
        outcome
    }

    async fn acquire(
        &self,
        request: CompletionRequest,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> std::result::Result<TokenStream, StreamTerminal> {
        let completion = Arc::clone(&self.completion);
        let mut task = tokio::spawn(async move { completion.stream(&request).await });

        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = events.closed() => None,
            res = tokio::time::timeout(self.config.acquire_timeout, &mut task) => Some(res),
        };

        let err = match acquired {
            None => {
                task.abort();
                let _ = task.await;
                debug!("Consumer left before generation started");
                return Err(StreamTerminal::Cancelled);
            }
            Some(Ok(Ok(Ok(tokens)))) => return Ok(tokens),
            Some(Ok(Ok(Err(e)))) => e,
            Some(Ok(Err(join))) => RagError::UpstreamFailure(format!("generation task failed: {}", join)),
            Some(Err(_)) => {
                task.abort();
                let _ = task.await;
                RagError::timeout("completion acquire", self.config.acquire_timeout)
            }
        };

        warn!(error = %err, "Failed to start generation");
        Err(errored(err, events, cancel).await)
    }

    async fn pump(
        &self,
        mut tokens: TokenStream,
        state: &mut StreamState,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> StreamTerminal {
        let terminal = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StreamTerminal::Cancelled,
                _ = events.closed() => break StreamTerminal::Cancelled,
                next = tokio::time::timeout(self.config.delta_timeout, tokens.next()) => next,
            };

            match next {
                Ok(Some(Ok(delta))) => {
                    state.buffer.push_str(&delta);
                    if let Flush::Disconnected = flush(state, events, cancel).await {
                        break StreamTerminal::Cancelled;
                    }
                }
                Ok(None) => {
                    if let Flush::Disconnected = flush(state, events, cancel).await {
                        break StreamTerminal::Cancelled;
                    }
                    if let Flush::Disconnected = deliver(StreamEvent::End, events, cancel).await {
                        break StreamTerminal::Cancelled;
                    }
                    break StreamTerminal::Completed;
                }
                Ok(Some(Err(e))) => {
                    break errored(e, events, cancel).await;
                }
                Err(_) => {
                    let err = RagError::timeout("token delta", self.config.delta_timeout);
                    break errored(err, events, cancel).await;
                }
            }
        };

        tokens.cancel().await;
        terminal
    }
}

/// Send one event unless the consumer leaves first.
///
/// A send blocked on a full channel is abandoned when `cancel` fires, so
/// nothing is delivered after cancellation.
pub(crate) async fn deliver(
    event: StreamEvent,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Flush {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Flush::Disconnected,
        sent = events.send(event) => match sent {
            Ok(()) => Flush::Sent,
            Err(_) => Flush::Disconnected,
        },
    }
}

/// Send the pending buffer; it joins `full_response` only once delivered
async fn flush(
    state: &mut StreamState,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Flush {
    if state.buffer.is_empty() {
        return Flush::Sent;
    }
    let chunk = std::mem::take(&mut state.buffer);
    match deliver(StreamEvent::Content(chunk.clone()), events, cancel).await {
        Flush::Sent => {
            state.full_response.push_str(&chunk);
            Flush::Sent
        }
        Flush::Disconnected => Flush::Disconnected,
    }
}

/// Emit the error frame. A consumer that left meanwhile makes it a cancel.
async fn errored(
    err: RagError,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> StreamTerminal {
    warn!(error = %err, "Generation failed");
    match deliver(StreamEvent::Error(err.to_string()), events, cancel).await {
        Flush::Sent => StreamTerminal::from_error(&err),
        Flush::Disconnected => StreamTerminal::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Result;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::Mutex;

    struct Scripted {
        deltas: Vec<Result<String>>,
        hang_after: bool,
    }

    #[async_trait]
    impl Completion for Scripted {
        async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream> {
            let deltas: Vec<Result<String>> = self
                .deltas
                .iter()
                .map(|d| match d {
                    Ok(s) => Ok(s.clone()),
                    Err(e) => Err(RagError::UpstreamFailure(e.to_string())),
                })
                .collect();
            let source = futures_util::stream::iter(deltas);
            if self.hang_after {
                Ok(TokenStream::from_stream(source.chain(futures_util::stream::pending())))
            } else {
                Ok(TokenStream::from_stream(source))
            }
        }
    }

    struct NeverAccepts;

    #[async_trait]
    impl Completion for NeverAccepts {
        async fn stream(&self, _request: &CompletionRequest) -> Result<TokenStream> {
            futures_util::future::pending().await
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            messages: Vec::new(),
            max_tokens: 16,
            temperature: 0.0,
        }
    }

    fn orchestrator(completion: impl Completion + 'static) -> StreamOrchestrator {
        StreamOrchestrator::new(
            Arc::new(completion),
            OrchestratorConfig {
                acquire_timeout: Duration::from_millis(100),
                delta_timeout: Duration::from_millis(200),
            },
        )
    }

    fn ok(parts: &[&str]) -> Vec<Result<String>> {
        parts.iter().map(|p| Ok(p.to_string())).collect()
    }

    #[test]
    fn test_phase_transitions() {
        assert!(StreamPhase::Init.can_transition_to(StreamPhase::Requesting));
        assert!(StreamPhase::Requesting.can_transition_to(StreamPhase::Errored));
        assert!(!StreamPhase::Init.can_transition_to(StreamPhase::Streaming));
        assert!(!StreamPhase::Completed.can_transition_to(StreamPhase::Errored));
        assert!(!StreamPhase::Requesting.can_transition_to(StreamPhase::Completed));
        assert!(StreamPhase::Cancelled.is_terminal());
    }

    #[tokio::test]
    async fn test_completed_stream() {
        let orch = orchestrator(Scripted {
            deltas: ok(&["Hel", "lo"]),
            hang_after: false,
        });
        let (tx, mut rx) = mpsc::channel(8);
        let calls = Mutex::new(Vec::new());

        let outcome = orch
            .run(request(), &tx, &CancellationToken::new(), |o| {
                calls.lock().unwrap().push(o.clone())
            })
            .await;
        drop(tx);

        assert_eq!(outcome.terminal, StreamTerminal::Completed);
        assert_eq!(outcome.full_response, "Hello");
        assert_eq!(calls.lock().unwrap().len(), 1);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("Hel".to_string()),
                StreamEvent::Content("lo".to_string()),
                StreamEvent::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_partial_text() {
        let mut deltas = ok(&["part"]);
        deltas.push(Err(RagError::UpstreamFailure("reset".to_string())));
        let orch = orchestrator(Scripted {
            deltas,
            hang_after: false,
        });
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = orch.run(request(), &tx, &CancellationToken::new(), |_| {}).await;

        assert!(matches!(outcome.terminal, StreamTerminal::Errored { code: 502, .. }));
        assert_eq!(outcome.full_response, "part");
        assert_eq!(rx.recv().await, Some(StreamEvent::Content("part".to_string())));
        assert!(matches!(rx.recv().await, Some(StreamEvent::Error(m)) if m.contains("reset")));
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let orch = orchestrator(NeverAccepts);
        let (tx, mut rx) = mpsc::channel(8);

        let outcome = orch.run(request(), &tx, &CancellationToken::new(), |_| {}).await;

        assert!(matches!(
            outcome.terminal,
            StreamTerminal::Errored { code: 504, ref message } if message.contains("timed out")
        ));
        assert!(outcome.full_response.is_empty());
        assert!(matches!(rx.recv().await, Some(StreamEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_stalled_delta_times_out() {
        let orch = orchestrator(Scripted {
            deltas: ok(&["a"]),
            hang_after: true,
        });
        let (tx, _rx) = mpsc::channel(8);

        let outcome = orch.run(request(), &tx, &CancellationToken::new(), |_| {}).await;
        assert!(matches!(outcome.terminal, StreamTerminal::Errored { code: 504, .. }));
        assert_eq!(outcome.full_response, "a");
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels() {
        let orch = orchestrator(Scripted {
            deltas: ok(&["a", "b", "c"]),
            hang_after: true,
        });
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let outcome = orch.run(request(), &tx, &CancellationToken::new(), |_| {}).await;
        assert_eq!(outcome.terminal, StreamTerminal::Cancelled);
        assert!(outcome.full_response.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_channel_full_sends_nothing_more() {
        let orch = orchestrator(Scripted {
            deltas: ok(&["a", "b", "c"]),
            hang_after: true,
        });
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        // "a" fills the channel, the send of "b" blocks until cancel fires
        let (outcome, _) = tokio::join!(orch.run(request(), &tx, &cancel, |_| {}), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        drop(tx);

        assert_eq!(outcome.terminal, StreamTerminal::Cancelled);
        assert_eq!(outcome.full_response, "a");
        assert_eq!(rx.recv().await, Some(StreamEvent::Content("a".to_string())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_cancel_before_acquire() {
        let orch = orchestrator(NeverAccepts);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = orch.run(request(), &tx, &cancel, |_| {}).await;
        drop(tx);

        assert_eq!(outcome.terminal, StreamTerminal::Cancelled);
        assert!(rx.recv().await.is_none());
    }
}
