use serde::{Deserialize, Serialize};

use super::Message;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One durable generation unit of work.
///
/// The task id is the triggering user message id, which doubles as the
/// stream channel id and makes re-submission of the same turn a natural
/// no-op in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTask {
    pub id: String,
    pub conversation_id: String,
    pub message: Message,
    pub status: TaskStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
}

impl GenerationTask {
    pub fn new(conversation_id: String, message: Message) -> Self {
        Self {
            id: message.id.clone(),
            conversation_id,
            message,
            status: TaskStatus::Pending,
            created_at: chrono::Utc::now().timestamp_millis(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(chrono::Utc::now().timestamp_millis());
    }

    pub fn complete(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp_millis());
    }

    pub fn fail(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(chrono::Utc::now().timestamp_millis());
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_is_message_id() {
        let message = Message::user("hi");
        let message_id = message.id.clone();
        let task = GenerationTask::new("c1".to_string(), message);
        assert_eq!(task.id, message_id);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut task = GenerationTask::new("c1".to_string(), Message::user("hi"));
        task.start();
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.started_at.is_some());

        task.fail("model unavailable".to_string());
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("model unavailable"));
    }
}
