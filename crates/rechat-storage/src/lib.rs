//! rechat storage - persistence layer for the resumable streaming core.
//!
//! Everything durable lives in a single redb database: the
//! per-conversation message history, the retained per-stream event log,
//! and the generation task queue. The APIs here are byte-level; typed
//! wrappers live in rechat-core so this crate stays model-free.
//!
//! # Tables
//!
//! - `history:data` / `history:index` - conversation message log
//! - `stream:events` - retained chunk events per stream channel
//! - `tasks:pending/processing/completed` - durable generation queue

pub mod history;
pub mod range_utils;
pub mod stream_log;
pub mod task_queue;

use anyhow::Result;
use redb::Database;
use std::sync::Arc;

pub use history::HistoryStorage;
pub use stream_log::StreamLogStorage;
pub use task_queue::TaskQueue;

/// Central storage manager that initializes all storage subsystems
pub struct Storage {
    pub history: HistoryStorage,
    pub stream_log: StreamLogStorage,
    pub tasks: TaskQueue,
}

impl Storage {
    /// Create a new storage instance at the given path.
    ///
    /// This will create the database file if it doesn't exist and
    /// initialize all required tables.
    pub fn new(path: &str) -> Result<Self> {
        let db = Arc::new(Database::create(path)?);

        let history = HistoryStorage::new(db.clone())?;
        let stream_log = StreamLogStorage::new(db.clone())?;
        let tasks = TaskQueue::new(db)?;

        Ok(Self {
            history,
            stream_log,
            tasks,
        })
    }
}
