//! Typed view over the append-only conversation log.

use rechat_storage::HistoryStorage;
use tracing::debug;

use crate::error::Result;
use crate::models::Message;

/// Conversation history with idempotent append.
#[derive(Clone)]
pub struct ConversationHistory {
    storage: HistoryStorage,
}

impl ConversationHistory {
    pub fn new(storage: HistoryStorage) -> Self {
        Self { storage }
    }

    /// Append a message; returns `false` when the message id was already
    /// present, in which case the stored message is left untouched.
    pub fn append(&self, conversation_id: &str, message: &Message) -> Result<bool> {
        let data = serde_json::to_vec(message)?;
        let inserted =
            self.storage
                .append_raw(conversation_id, &message.id, message.submitted_at, &data)?;
        if !inserted {
            debug!(
                conversation_id,
                message_id = %message.id,
                "Duplicate append ignored"
            );
        }
        Ok(inserted)
    }

    /// All messages of a conversation in submission order. Unknown
    /// conversations read back empty.
    pub fn read(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.storage
            .read_raw(conversation_id)?
            .iter()
            .map(|data| serde_json::from_slice(data).map_err(Into::into))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Role};
    use redb::Database;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (ConversationHistory, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let history = ConversationHistory::new(HistoryStorage::new(db).unwrap());
        (history, temp_dir)
    }

    #[test]
    fn test_round_trip_preserves_message() {
        let (history, _temp_dir) = setup();

        let message = Message::user("hello");
        assert!(history.append("c1", &message).unwrap());

        let messages = history.read("c1").unwrap();
        assert_eq!(messages, vec![message]);
    }

    #[test]
    fn test_duplicate_id_keeps_first_write() {
        let (history, _temp_dir) = setup();

        let original = Message::user("original");
        let mut retry = original.clone();
        retry.parts = vec![crate::models::MessagePart::Text {
            text: "mutated".to_string(),
        }];

        assert!(history.append("c1", &original).unwrap());
        assert!(!history.append("c1", &retry).unwrap());

        let messages = history.read("c1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "original");
    }

    #[test]
    fn test_interleaved_roles_read_in_order() {
        let (history, _temp_dir) = setup();

        let mut user = Message::user("question");
        user.submitted_at = 1000;
        let mut assistant = Message::assistant("a1", "answer");
        assistant.submitted_at = 2000;

        history.append("c1", &assistant).unwrap();
        history.append("c1", &user).unwrap();

        let messages = history.read("c1").unwrap();
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
    }
}
