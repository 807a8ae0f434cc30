//! Client-side session persistence.
//!
//! A tiny JSON file records the last message this client triggered and
//! whether its stream reached the terminal event, so a restarted client
//! knows whether to resume an in-flight stream or start fresh.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub conversation_id: String,
    /// Id of the last message this client sent a trigger for.
    pub last_message_id: Option<String>,
    /// Whether that message's stream delivered its terminal event.
    pub last_event_terminal: bool,
}

impl SessionRecord {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            last_message_id: None,
            last_event_terminal: true,
        }
    }

    /// A turn that was in flight when the session was interrupted.
    pub fn interrupted_stream(&self) -> Option<&str> {
        if self.last_event_terminal {
            return None;
        }
        self.last_message_id.as_deref()
    }
}

/// File-backed store for a [`SessionRecord`].
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<Option<SessionRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let contents = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}
