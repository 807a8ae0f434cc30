//! Resumable HTTP transport.
//!
//! A fresh send issues the generation trigger and the stream attach
//! concurrently; the server tolerates either arriving first. A resume
//! after disconnect re-attaches to the stream only, with the reconnect
//! header set, and never re-triggers generation. Either way the consumer
//! sees one ordered event stream ending in `finish`.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use rechat_core::{ChunkEvent, Message};

use crate::error::{Result, TransportError};

/// Header that marks a stream attach as a resume of an earlier one.
pub const RECONNECT_HEADER: &str = "x-reconnect";

pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChunkEvent>> + Send>>;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

pub struct ChatTransport {
    http: Client,
    base_url: String,
}

impl ChatTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Send a user message: trigger generation and attach to its stream
    /// in one step. Returns the message that was sent (the caller needs
    /// its id to resume later) and the event stream.
    pub async fn send(
        &self,
        conversation_id: &str,
        text: impl Into<String>,
    ) -> Result<(Message, EventStream)> {
        let message = Message::user(text.into());
        let stream = self.send_message(conversation_id, &message).await?;
        Ok((message, stream))
    }

    /// Trigger generation for an already-built message and attach to its
    /// stream. Split out from [`send`](Self::send) so callers can persist
    /// the message id before anything goes over the wire.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<EventStream> {
        debug!(conversation_id, message_id = %message.id, "Sending message");

        // Trigger and attach race intentionally; the stream may open
        // before the server has seen the trigger.
        let (stream, ()) = tokio::try_join!(
            self.open_stream(&message.id, false),
            self.trigger(conversation_id, message),
        )?;

        Ok(stream)
    }

    /// Re-attach to an interrupted stream. Replays everything retained
    /// so far and then follows live. Does not trigger generation.
    pub async fn resume(&self, stream_id: &str) -> Result<EventStream> {
        debug!(stream_id, "Resuming stream");
        self.open_stream(stream_id, true).await
    }

    /// Fetch the full message log of a conversation.
    pub async fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let response = self
            .http
            .get(format!(
                "{}/conversations/{}/messages",
                self.base_url, conversation_id
            ))
            .send()
            .await?;

        let envelope: Envelope<Vec<Message>> = response.json().await?;
        if !envelope.success {
            return Err(TransportError::Server {
                status: 200,
                message: envelope
                    .message
                    .unwrap_or_else(|| "unknown server error".to_string()),
            });
        }
        Ok(envelope.data.unwrap_or_default())
    }

    async fn trigger(&self, conversation_id: &str, message: &Message) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/generate", self.base_url))
            .json(&serde_json::json!({
                "conversationId": conversation_id,
                "message": message,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn open_stream(&self, stream_id: &str, reconnect: bool) -> Result<EventStream> {
        let mut request = self
            .http
            .get(format!("{}/stream", self.base_url))
            .query(&[("id", stream_id)]);
        if reconnect {
            request = request.header(RECONNECT_HEADER, "true");
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::StreamNotFound(stream_id.to_string()));
        }
        if !status.is_success() {
            return Err(TransportError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let mut byte_stream = response.bytes_stream();

        Ok(Box::pin(async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(TransportError::Http(e));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(frame) = take_frame(&mut buffer) {
                    for line in frame.lines() {
                        let Some(data) = line.strip_prefix("data: ") else {
                            continue;
                        };
                        let event: ChunkEvent = match serde_json::from_str(data) {
                            Ok(event) => event,
                            Err(e) => {
                                yield Err(TransportError::Json(e));
                                return;
                            }
                        };
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            return;
                        }
                    }
                }
            }
        }))
    }
}

// Pop one complete `\n\n`-terminated SSE frame off the front of the
// buffer. Only whole frames are decoded, so a multibyte character split
// across two network chunks is reassembled instead of mangled.
fn take_frame(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.windows(2).position(|w| w == b"\n\n")?;
    let frame = String::from_utf8_lossy(&buffer[..pos]).into_owned();
    buffer.drain(..pos + 2);
    Some(frame)
}
