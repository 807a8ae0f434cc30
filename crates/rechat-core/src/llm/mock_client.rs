//! Scripted LLM client for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::CoreError;
use crate::llm::client::{CompletionRequest, FinishReason, LlmClient, StreamChunk, StreamResult};

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// Stream these chunks, then finish cleanly.
    Chunks(Vec<String>),
    /// Stream these chunks, then fail with a retryable error.
    FailAfter(Vec<String>, String),
    /// Fail immediately with a non-retryable error.
    Reject(String),
}

/// Scripted client: each call consumes the next [`MockTurn`]; once the
/// script runs out every call echoes the last user message. The call
/// counter lets tests assert that reconnects never re-trigger generation.
pub struct MockLlmClient {
    turns: Mutex<VecDeque<MockTurn>>,
    call_count: AtomicUsize,
    chunk_delay: Duration,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(VecDeque::new()),
            call_count: AtomicUsize::new(0),
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn with_turns(turns: impl IntoIterator<Item = MockTurn>) -> Self {
        let client = Self::new();
        *client.turns.lock().unwrap() = turns.into_iter().collect();
        client
    }

    /// Pause between streamed chunks, so tests can disconnect mid-stream.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Number of completion calls made so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn next_turn(&self, request: &CompletionRequest) -> MockTurn {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.turns.lock().unwrap().pop_front().unwrap_or_else(|| {
            let prompt = request
                .messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default();
            MockTurn::Chunks(vec![format!("echo: {prompt}")])
        })
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let turn = self.next_turn(&request);
        let delay = self.chunk_delay;

        Box::pin(async_stream::stream! {
            match turn {
                MockTurn::Chunks(chunks) => {
                    for chunk in chunks {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        yield Ok(StreamChunk::text(chunk));
                    }
                    yield Ok(StreamChunk::final_chunk(FinishReason::Stop, None));
                }
                MockTurn::FailAfter(chunks, message) => {
                    for chunk in chunks {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        yield Ok(StreamChunk::text(chunk));
                    }
                    yield Err(CoreError::Llm(format!("stream error: {message}")));
                }
                MockTurn::Reject(message) => {
                    yield Err(CoreError::Llm(message));
                }
            }
        })
    }
}
