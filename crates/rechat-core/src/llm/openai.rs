//! OpenAI-compatible chat completion client.
//!
//! Works against any endpoint speaking the OpenAI chat completions
//! protocol; the base URL is configurable so the same client covers
//! OpenRouter and self-hosted gateways.

use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use crate::error::CoreError;
use crate::llm::client::{
    CompletionRequest, FinishReason, LlmClient, StreamChunk, StreamResult, TokenUsage,
};
use crate::llm::retry::response_to_error;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": true,
        })
    }

    fn map_finish_reason(reason: &str) -> FinishReason {
        match reason {
            "stop" => FinishReason::Stop,
            "length" => FinishReason::MaxTokens,
            _ => FinishReason::Error,
        }
    }
}

impl LlmClient for OpenAiClient {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn complete_stream(&self, request: CompletionRequest) -> StreamResult {
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();
        let base_url = self.base_url.clone();

        Box::pin(async_stream::stream! {
            let body = Self::request_body(&model, &request);

            let response = match client
                .post(format!("{}/chat/completions", base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(CoreError::Llm(format!("Request failed: {}", e)));
                    return;
                }
            };

            if !response.status().is_success() {
                yield Err(response_to_error(response, "openai").await);
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut finished = false;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(CoreError::Llm(format!("Stream error: {}", e)));
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);

                // Process complete SSE events from the buffer
                while let Some(event_str) = take_frame(&mut buffer) {
                    for line in event_str.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        if data.trim() == "[DONE]" {
                            continue;
                        }

                        let parsed: OpenAiStreamResponse = match serde_json::from_str(data) {
                            Ok(p) => p,
                            Err(_) => continue,
                        };

                        for choice in parsed.choices {
                            if let Some(content) = choice.delta.and_then(|d| d.content)
                                && !content.is_empty()
                            {
                                yield Ok(StreamChunk::text(&content));
                            }

                            if let Some(finish_reason) = choice.finish_reason {
                                finished = true;
                                let usage = parsed.usage.as_ref().map(|u| TokenUsage {
                                    prompt_tokens: u.prompt_tokens,
                                    completion_tokens: u.completion_tokens,
                                    total_tokens: u.total_tokens,
                                });
                                yield Ok(StreamChunk::final_chunk(
                                    Self::map_finish_reason(&finish_reason),
                                    usage,
                                ));
                            }
                        }
                    }
                }
            }

            if !finished {
                // Stream ended without a finish_reason (e.g. connection cut
                // right after [DONE]); report what we have as a clean stop.
                yield Ok(StreamChunk::final_chunk(FinishReason::Stop, None));
            }
        })
    }
}

// Pop one complete `\n\n`-terminated SSE frame off the front of the
// buffer. Frames are decoded whole, so a multibyte character split
// across two network chunks stays intact.
fn take_frame(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.windows(2).position(|w| w == b"\n\n")?;
    let frame = String::from_utf8_lossy(&buffer[..pos]).into_owned();
    buffer.drain(..pos + 2);
    Some(frame)
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamResponse {
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
