use serde::{Deserialize, Serialize};

/// One chunk event on a stream channel.
///
/// A closed tagged variant: `finish` is the unique terminal marker and
/// every other kind carries partial content. Events within one channel
/// are totally ordered (emission order = replay order).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChunkEvent {
    TextDelta { delta: String },
    Error { message: String },
    Finish,
}

impl ChunkEvent {
    pub fn text_delta(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event closes the stream for every subscriber.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish)
    }
}
