//! Completion backends and the cancellable token stream they produce
//!
//! - [`Completion`]: opens a generation for a list of chat messages
//! - [`TokenStream`]: deltas from a background generation task that can be
//!   cancelled and awaited
//! - [`OllamaClient`]: streaming `POST /api/chat` over reqwest

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::parser::JsonParser;
use crate::errors::{RagError, Result};
use crate::types::ChatMessage;

/// Default Ollama API endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default model
pub const DEFAULT_MODEL: &str = "qwen2.5:7b-instruct";

/// Connect timeout; generation length is bounded by the orchestrator
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Buffered deltas between the generation task and its reader
const DELTA_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait Completion: Send + Sync {
    /// Open a generation; resolves once the backend has accepted the request
    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream>;
}

/// Text deltas produced by a background generation task
pub struct TokenStream {
    rx: mpsc::Receiver<Result<String>>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl TokenStream {
    /// Run `producer` as the generation task.
    ///
    /// The producer sends deltas on the channel and should stop once the
    /// token is cancelled or a send fails.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<Result<String>>, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(DELTA_BUFFER);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(producer(tx, cancel.clone()));
        Self {
            rx,
            task: Some(task),
            cancel,
        }
    }

    /// Forward an existing stream of deltas
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<String>> + Send + 'static,
    {
        Self::spawn(move |tx, cancel| async move {
            futures_util::pin_mut!(stream);
            loop {
                let item = tokio::select! {
                    _ = cancel.cancelled() => break,
                    item = stream.next() => item,
                };
                match item {
                    Some(item) => {
                        if tx.send(item).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        })
    }

    /// Next delta; `None` once generation has ended
    pub async fn next(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    /// Stop the generation task and wait for it to exit
    pub async fn cancel(mut self) {
        self.rx.close();
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TokenStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Ollama chat client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_OLLAMA_URL, DEFAULT_MODEL)
    }

    pub fn with_config(base_url: &str, model: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RagError::UpstreamFailure(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/version", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Completion for OllamaClient {
    async fn stream(&self, request: &CompletionRequest) -> Result<TokenStream> {
        let url = format!("{}/api/chat", self.base_url);

        let body = OllamaChatRequest {
            model: &self.model,
            messages: &request.messages,
            stream: true,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::UpstreamFailure(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::UpstreamFailure(format!("HTTP {}: {}", status, error_text)));
        }

        let bytes = response.bytes_stream();
        Ok(TokenStream::spawn(move |tx, cancel| async move {
            futures_util::pin_mut!(bytes);
            let mut parser = JsonParser::new();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Generation cancelled");
                        return;
                    }
                    chunk = bytes.next() => chunk,
                };

                let chunk = match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(RagError::UpstreamFailure(e.to_string()))).await;
                        return;
                    }
                    None => {
                        if !parser.is_drained() {
                            let _ = tx
                                .send(Err(RagError::UpstreamFailure(
                                    "stream ended mid-frame".to_string(),
                                )))
                                .await;
                        }
                        return;
                    }
                };

                if let Err(e) = parser.push(&chunk) {
                    let _ = tx.send(Err(e)).await;
                    return;
                }

                loop {
                    let frame = match parser.next_object() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    };
                    let parsed = match parser.parse_chunk(&frame) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    };
                    if let Some(error) = parsed.error {
                        let _ = tx.send(Err(RagError::UpstreamFailure(error))).await;
                        return;
                    }
                    if let Some(content) = parsed.content() {
                        if tx.send(Ok(content.to_string())).await.is_err() {
                            return;
                        }
                    }
                    if parsed.done {
                        return;
                    }
                }
            }
        }))
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}
