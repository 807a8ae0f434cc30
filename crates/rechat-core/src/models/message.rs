use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message author role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One ordered content part of a message. Text is the only part kind
/// the protocol requires; the closed enum keeps the wire format
/// extensible without falling back to untyped payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text { text: String },
}

/// Single message in a conversation's append-only log.
///
/// `id` is producer-generated (client for user messages, server for
/// assistant messages) and globally unique; once appended the message is
/// immutable. Ordering key is `submitted_at` in Unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub submitted_at: i64,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            parts: vec![MessagePart::Text {
                text: content.into(),
            }],
            submitted_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn assistant(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            parts: vec![MessagePart::Text {
                text: content.into(),
            }],
            submitted_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } => text.as_str(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_defaults() {
        let message = Message::user("hello");
        assert_eq!(message.role, Role::User);
        assert_eq!(message.text(), "hello");
        assert!(!message.id.is_empty());
        assert!(message.submitted_at > 0);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let message = Message::user("hi");
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("submittedAt").is_some());
        assert_eq!(json["role"], "user");
        assert_eq!(json["parts"][0]["type"], "text");
    }
}
