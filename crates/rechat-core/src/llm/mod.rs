//! LLM provider abstraction.

pub mod client;
pub mod mock_client;
pub mod openai;
pub mod retry;

pub use client::{
    ChatMessage, ChatRole, CompletionRequest, FinishReason, LlmClient, StreamChunk, StreamResult,
    TokenUsage,
};
pub use mock_client::{MockLlmClient, MockTurn};
pub use openai::OpenAiClient;
pub use retry::LlmRetryConfig;
