//! Task scheduling over the durable queue.
//!
//! The scheduler owns the typed view of the queue: submission with the
//! duplicate-trigger guard, blocking pop for workers, completion and
//! failure transitions, and restart recovery of tasks that were mid-run
//! when the process died.

use rechat_storage::TaskQueue;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::models::{GenerationTask, TaskStatus};

pub struct Scheduler {
    queue: TaskQueue,
    // Serializes pop so two workers cannot claim the same pending task.
    pop_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            pop_lock: Mutex::new(()),
        }
    }

    /// Enqueue a generation task.
    ///
    /// Returns `false` without touching the queue when a task with the
    /// same id is already pending, running or finished. This is what
    /// makes a re-sent trigger for the same user message a no-op.
    pub fn push_task(&self, task: &GenerationTask) -> Result<bool> {
        if self.queue.get_from_any_table(&task.id)?.is_some() {
            info!(task_id = %task.id, "Task already known, skipping enqueue");
            return Ok(false);
        }

        let data = serde_json::to_vec(task)?;
        self.queue
            .insert_pending(task.created_at.max(0) as u64, &task.id, &data)?;
        Ok(true)
    }

    /// Claim the oldest pending task, waiting if the queue is empty.
    /// The claimed task is moved to processing with status `Running`.
    pub async fn pop_task(&self) -> Result<GenerationTask> {
        loop {
            let claimed = {
                let _guard = self.pop_lock.lock().await;
                match self.queue.get_first_pending()? {
                    Some((created_at, task_id, data)) => {
                        let mut task: GenerationTask = serde_json::from_slice(&data)?;
                        task.start();
                        let data = serde_json::to_vec(&task)?;
                        self.queue.move_to_processing(created_at, &task_id, &data)?;
                        Some(task)
                    }
                    None => None,
                }
            };

            if let Some(task) = claimed {
                return Ok(task);
            }
            self.queue.wait_for_task().await;
        }
    }

    pub fn complete_task(&self, mut task: GenerationTask) -> Result<()> {
        task.complete();
        let data = serde_json::to_vec(&task)?;
        self.queue.move_to_completed(&task.id, &data)?;
        Ok(())
    }

    pub fn fail_task(&self, mut task: GenerationTask, error: String) -> Result<()> {
        task.fail(error);
        let data = serde_json::to_vec(&task)?;
        self.queue.move_to_completed(&task.id, &data)?;
        Ok(())
    }

    /// Look a task up in any queue table.
    pub fn get_task(&self, task_id: &str) -> Result<Option<GenerationTask>> {
        match self.queue.get_from_any_table(task_id)? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    /// Re-queue tasks that were running when the process last stopped.
    /// Returns how many tasks were recovered.
    pub fn recover_orphaned_tasks(&self) -> Result<usize> {
        let orphaned = self.queue.get_all_processing()?;
        let count = orphaned.len();

        for data in orphaned {
            let mut task: GenerationTask = serde_json::from_slice(&data)?;
            warn!(task_id = %task.id, "Recovering orphaned task");
            task.status = TaskStatus::Pending;
            task.started_at = None;
            let data = serde_json::to_vec(&task)?;
            self.queue
                .move_to_pending(task.created_at.max(0) as u64, &task.id, &data)?;
        }

        if count > 0 {
            info!(count, "Re-queued orphaned tasks");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use redb::Database;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (Scheduler, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let scheduler = Scheduler::new(TaskQueue::new(db).unwrap());
        (scheduler, temp_dir)
    }

    #[tokio::test]
    async fn test_push_then_pop_starts_task() {
        let (scheduler, _temp_dir) = setup();

        let task = GenerationTask::new("c1".to_string(), Message::user("hi"));
        assert!(scheduler.push_task(&task).unwrap());

        let claimed = scheduler.pop_task().await.unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, TaskStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_push_is_rejected() {
        let (scheduler, _temp_dir) = setup();

        let task = GenerationTask::new("c1".to_string(), Message::user("hi"));
        assert!(scheduler.push_task(&task).unwrap());
        assert!(!scheduler.push_task(&task).unwrap());

        // Still rejected after the task finishes
        let claimed = scheduler.pop_task().await.unwrap();
        scheduler.complete_task(claimed).unwrap();
        assert!(!scheduler.push_task(&task).unwrap());
    }

    #[tokio::test]
    async fn test_completed_task_is_queryable() {
        let (scheduler, _temp_dir) = setup();

        let task = GenerationTask::new("c1".to_string(), Message::user("hi"));
        scheduler.push_task(&task).unwrap();
        let claimed = scheduler.pop_task().await.unwrap();
        scheduler.complete_task(claimed).unwrap();

        let stored = scheduler.get_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_task_records_error() {
        let (scheduler, _temp_dir) = setup();

        let task = GenerationTask::new("c1".to_string(), Message::user("hi"));
        scheduler.push_task(&task).unwrap();
        let claimed = scheduler.pop_task().await.unwrap();
        scheduler
            .fail_task(claimed, "provider down".to_string())
            .unwrap();

        let stored = scheduler.get_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("provider down"));
    }

    #[tokio::test]
    async fn test_recover_orphaned_tasks() {
        let (scheduler, _temp_dir) = setup();

        let task = GenerationTask::new("c1".to_string(), Message::user("hi"));
        scheduler.push_task(&task).unwrap();
        let _running = scheduler.pop_task().await.unwrap();

        // Simulate a restart with the task still in processing
        assert_eq!(scheduler.recover_orphaned_tasks().unwrap(), 1);

        let recovered = scheduler.pop_task().await.unwrap();
        assert_eq!(recovered.id, task.id);
        assert_eq!(recovered.status, TaskStatus::Running);
    }
}
