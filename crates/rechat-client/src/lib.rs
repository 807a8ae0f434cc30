//! Resumable chat client.
//!
//! [`ChatTransport`] is the stateless HTTP layer; [`ChatSession`] adds
//! the persisted session record and the per-message phase machine that
//! decide, on startup, between resuming an interrupted stream and
//! starting fresh.

pub mod error;
pub mod session;
pub mod transport;

pub use error::{Result, TransportError};
pub use session::{SessionRecord, SessionStore};
pub use transport::{ChatTransport, EventStream, RECONNECT_HEADER};

use rechat_core::{Message, Role};
use tracing::{info, warn};

/// Explicit lifecycle of the current message turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    Idle,
    Sending,
    Resuming,
    Streaming,
    Finished,
    Failed,
}

/// A conversation-scoped client with durable resume state.
pub struct ChatSession {
    transport: ChatTransport,
    store: SessionStore,
    record: SessionRecord,
    phase: TransportPhase,
}

impl ChatSession {
    /// Open a session, loading any previous record from the store. The
    /// conversation id of a stored record wins over `conversation_id`.
    pub fn open(
        transport: ChatTransport,
        store: SessionStore,
        conversation_id: &str,
    ) -> Result<Self> {
        let record = store
            .load()?
            .unwrap_or_else(|| SessionRecord::new(conversation_id));
        Ok(Self {
            transport,
            store,
            record,
            phase: TransportPhase::Idle,
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.record.conversation_id
    }

    pub fn phase(&self) -> TransportPhase {
        self.phase
    }

    /// Whether an earlier stream was interrupted before `finish`.
    pub fn has_pending_stream(&self) -> bool {
        self.record.interrupted_stream().is_some()
    }

    /// Send a new user message and attach to its stream. The message id
    /// is persisted before the send so a crash mid-stream is resumable.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<EventStream> {
        let conversation_id = self.record.conversation_id.clone();
        let message = Message::user(text.into());

        self.record.last_message_id = Some(message.id.clone());
        self.record.last_event_terminal = false;
        self.store.save(&self.record)?;
        self.phase = TransportPhase::Sending;

        match self.transport.send_message(&conversation_id, &message).await {
            Ok(stream) => {
                self.phase = TransportPhase::Streaming;
                Ok(stream)
            }
            Err(e) => {
                self.phase = TransportPhase::Failed;
                Err(e)
            }
        }
    }

    /// Resume the interrupted stream recorded in the session. Errors
    /// with [`TransportError::NothingToResume`] when there is none, or
    /// when the conversation has moved past the recorded message.
    pub async fn resume(&mut self) -> Result<EventStream> {
        let Some(stream_id) = self.record.interrupted_stream().map(String::from) else {
            return Err(TransportError::NothingToResume);
        };
        self.phase = TransportPhase::Resuming;

        // Resume only a turn that is still in flight: the recorded
        // message must still be the tail of the conversation, and its
        // assistant reply must not have landed yet.
        let history = self.transport.history(&self.record.conversation_id).await?;
        let in_flight = history.last().is_none_or(|last| match last.role {
            Role::User => last.id == stream_id,
            Role::Assistant => false,
        });
        if !in_flight {
            warn!(stream_id = %stream_id, "Recorded turn already completed or superseded");
            self.mark_finished()?;
            return Err(TransportError::NothingToResume);
        }

        info!(stream_id = %stream_id, "Resuming interrupted stream");
        match self.transport.resume(&stream_id).await {
            Ok(stream) => {
                self.phase = TransportPhase::Streaming;
                Ok(stream)
            }
            Err(e) => {
                self.phase = TransportPhase::Failed;
                Err(e)
            }
        }
    }

    /// Mark the pending stream as fully consumed.
    pub fn mark_finished(&mut self) -> Result<()> {
        self.record.last_event_terminal = true;
        self.store.save(&self.record)?;
        self.phase = TransportPhase::Finished;
        Ok(())
    }

    pub async fn history(&self) -> Result<Vec<Message>> {
        self.transport.history(&self.record.conversation_id).await
    }
}
