//! Durable generation task queue - pure storage layer.
//!
//! Three-table design gives O(1) pop without scanning: pending tasks are
//! keyed `(created_at, task_id)` so submissions in the same millisecond
//! cannot collide, processing and completed tasks are keyed by task id.
//! A task that survives in `processing` across a process restart is
//! re-queued by the scheduler, which is what makes generation durable.

use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;
use tokio::sync::Notify;

const PENDING: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("tasks:pending");
const PROCESSING: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks:processing");
const COMPLETED: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks:completed");

/// Pure storage layer for the task queue - only handles data persistence
#[derive(Clone)]
pub struct TaskQueue {
    db: Arc<Database>,
    notify: Arc<Notify>,
}

impl TaskQueue {
    /// Create a new task queue instance
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(PENDING)?;
        write_txn.open_table(PROCESSING)?;
        write_txn.open_table(COMPLETED)?;
        write_txn.commit()?;

        Ok(Self {
            db,
            notify: Arc::new(Notify::new()),
        })
    }

    /// Insert a task into the pending queue
    pub fn insert_pending(&self, created_at: u64, task_id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PENDING)?;
            table.insert((created_at, task_id), data)?;
        }
        write_txn.commit()?;
        self.notify.notify_one();
        Ok(())
    }

    /// Get the oldest pending task without removing it
    pub fn get_first_pending(&self) -> Result<Option<(u64, String, Vec<u8>)>> {
        let read_txn = self.db.begin_read()?;
        let pending = read_txn.open_table(PENDING)?;

        if let Some((key, value)) = pending.first()? {
            let (created_at, task_id) = key.value();
            Ok(Some((created_at, task_id.to_string(), value.value().to_vec())))
        } else {
            Ok(None)
        }
    }

    /// Move a task from pending to processing
    pub fn move_to_processing(&self, created_at: u64, task_id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut pending = write_txn.open_table(PENDING)?;
            pending.remove((created_at, task_id))?;
        }
        {
            let mut processing = write_txn.open_table(PROCESSING)?;
            processing.insert(task_id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Move a task from processing to completed
    pub fn move_to_completed(&self, task_id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut processing = write_txn.open_table(PROCESSING)?;
            processing.remove(task_id)?;
        }
        {
            let mut completed = write_txn.open_table(COMPLETED)?;
            completed.insert(task_id, data)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Move a task from processing back to pending (restart recovery)
    pub fn move_to_pending(&self, created_at: u64, task_id: &str, data: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut processing = write_txn.open_table(PROCESSING)?;
            processing.remove(task_id)?;
        }
        {
            let mut pending = write_txn.open_table(PENDING)?;
            pending.insert((created_at, task_id), data)?;
        }
        write_txn.commit()?;
        self.notify.notify_one();
        Ok(())
    }

    /// Get a task from the processing table
    pub fn get_from_processing(&self, task_id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let processing = read_txn.open_table(PROCESSING)?;

        if let Some(data) = processing.get(task_id)? {
            Ok(Some(data.value().to_vec()))
        } else {
            Ok(None)
        }
    }

    /// Get a task from any table by id
    pub fn get_from_any_table(&self, task_id: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;

        let processing = read_txn.open_table(PROCESSING)?;
        if let Some(data) = processing.get(task_id)? {
            return Ok(Some(data.value().to_vec()));
        }

        let completed = read_txn.open_table(COMPLETED)?;
        if let Some(data) = completed.get(task_id)? {
            return Ok(Some(data.value().to_vec()));
        }

        let pending = read_txn.open_table(PENDING)?;
        for entry in pending.iter()? {
            let (key, value) = entry?;
            let (_, pending_id) = key.value();
            if pending_id == task_id {
                return Ok(Some(value.value().to_vec()));
            }
        }

        Ok(None)
    }

    /// Get all tasks from the processing table
    pub fn get_all_processing(&self) -> Result<Vec<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let processing = read_txn.open_table(PROCESSING)?;
        let mut tasks = Vec::new();

        for entry in processing.iter()? {
            let (_, value) = entry?;
            tasks.push(value.value().to_vec());
        }

        Ok(tasks)
    }

    /// Wait for a task to be available
    pub async fn wait_for_task(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup_test_queue() -> (TaskQueue, tempfile::TempDir) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(Database::create(db_path).unwrap());
        let queue = TaskQueue::new(db).unwrap();
        (queue, temp_dir)
    }

    #[test]
    fn test_insert_and_get_pending() {
        let (queue, _temp_dir) = setup_test_queue();

        queue.insert_pending(100, "task-001", b"task data").unwrap();

        let (created_at, task_id, data) = queue.get_first_pending().unwrap().unwrap();
        assert_eq!(created_at, 100);
        assert_eq!(task_id, "task-001");
        assert_eq!(data, b"task data");
    }

    #[test]
    fn test_fifo_order() {
        let (queue, _temp_dir) = setup_test_queue();

        queue.insert_pending(300, "task-c", b"late").unwrap();
        queue.insert_pending(100, "task-a", b"early").unwrap();
        queue.insert_pending(200, "task-b", b"middle").unwrap();

        let (created_at, task_id, _) = queue.get_first_pending().unwrap().unwrap();
        assert_eq!(created_at, 100);
        assert_eq!(task_id, "task-a");
    }

    #[test]
    fn test_same_timestamp_does_not_collide() {
        let (queue, _temp_dir) = setup_test_queue();

        queue.insert_pending(100, "task-a", b"a").unwrap();
        queue.insert_pending(100, "task-b", b"b").unwrap();

        assert!(queue.get_from_any_table("task-a").unwrap().is_some());
        assert!(queue.get_from_any_table("task-b").unwrap().is_some());
    }

    #[test]
    fn test_move_to_processing() {
        let (queue, _temp_dir) = setup_test_queue();

        queue.insert_pending(100, "task-001", b"task").unwrap();
        queue.move_to_processing(100, "task-001", b"task").unwrap();

        assert!(queue.get_first_pending().unwrap().is_none());
        assert_eq!(
            queue.get_from_processing("task-001").unwrap(),
            Some(b"task".to_vec())
        );
    }

    #[test]
    fn test_move_to_completed() {
        let (queue, _temp_dir) = setup_test_queue();

        queue.insert_pending(100, "task-001", b"task").unwrap();
        queue.move_to_processing(100, "task-001", b"task").unwrap();
        queue.move_to_completed("task-001", b"done").unwrap();

        assert!(queue.get_from_processing("task-001").unwrap().is_none());
        assert_eq!(
            queue.get_from_any_table("task-001").unwrap(),
            Some(b"done".to_vec())
        );
    }

    #[test]
    fn test_move_back_to_pending() {
        let (queue, _temp_dir) = setup_test_queue();

        queue.insert_pending(100, "task-001", b"task").unwrap();
        queue.move_to_processing(100, "task-001", b"task").unwrap();
        queue.move_to_pending(100, "task-001", b"task").unwrap();

        assert!(queue.get_from_processing("task-001").unwrap().is_none());
        let (_, task_id, _) = queue.get_first_pending().unwrap().unwrap();
        assert_eq!(task_id, "task-001");
    }

    #[test]
    fn test_get_from_any_table_checks_pending() {
        let (queue, _temp_dir) = setup_test_queue();

        queue.insert_pending(100, "task-001", b"pending task").unwrap();

        assert_eq!(
            queue.get_from_any_table("task-001").unwrap(),
            Some(b"pending task".to_vec())
        );
        assert!(queue.get_from_any_table("nonexistent").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wait_for_task() {
        let (queue, _temp_dir) = setup_test_queue();

        let queue_clone = queue.clone();
        let wait_handle = tokio::spawn(async move {
            tokio::select! {
                _ = queue_clone.wait_for_task() => true,
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => false,
            }
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        queue.insert_pending(100, "task-001", b"new task").unwrap();

        assert!(wait_handle.await.unwrap());
    }
}
