//! Resumable chat generation core.
//!
//! Ties the durable pieces together: the append-only conversation
//! history, the per-message stream channels with replay, the task queue
//! and the generation worker pool. The HTTP layer and the client
//! transport both sit on top of [`AppCore`].

pub mod channel;
pub mod error;
pub mod generation;
pub mod history;
pub mod llm;
pub mod models;
pub mod scheduler;

use std::sync::Arc;

use rechat_storage::Storage;
use tracing::info;

pub use crate::channel::ChannelRegistry;
pub use crate::error::{CoreError, Result};
pub use crate::generation::{GenerationConfig, GenerationRunner};
pub use crate::history::ConversationHistory;
pub use crate::models::{ChunkEvent, GenerationTask, Message, MessagePart, Role, TaskStatus};

/// Application core shared by every HTTP handler.
pub struct AppCore {
    pub channels: Arc<ChannelRegistry>,
    pub history: ConversationHistory,
    pub scheduler: Arc<scheduler::Scheduler>,
    runner: Arc<GenerationRunner>,
}

impl AppCore {
    /// Open (or create) the database, recover tasks orphaned by a
    /// previous run and start the generation workers.
    pub fn new(
        db_path: &str,
        llm: Arc<dyn llm::LlmClient>,
        config: GenerationConfig,
    ) -> Result<Self> {
        let storage = Storage::new(db_path)?;

        let channels = Arc::new(ChannelRegistry::new(storage.stream_log.clone()));
        let history = ConversationHistory::new(storage.history.clone());
        let scheduler = Arc::new(scheduler::Scheduler::new(storage.tasks.clone()));

        let recovered = scheduler.recover_orphaned_tasks()?;
        if recovered > 0 {
            info!(recovered, "Resumed interrupted generation tasks");
        }

        let runner = Arc::new(GenerationRunner::new(
            Arc::clone(&scheduler),
            Arc::clone(&channels),
            history.clone(),
            llm,
            config,
        ));
        runner.start();

        Ok(Self {
            channels,
            history,
            scheduler,
            runner,
        })
    }

    /// Handle a generation trigger for a user message.
    ///
    /// Appends the message to the conversation (idempotently) and
    /// enqueues the generation task. Returns `true` when a new task was
    /// enqueued, `false` when this trigger was a duplicate and generation
    /// is already running or done.
    pub fn submit(&self, conversation_id: &str, message: Message) -> Result<bool> {
        self.history.append(conversation_id, &message)?;
        let task = GenerationTask::new(conversation_id.to_string(), message);
        let enqueued = self.scheduler.push_task(&task)?;
        if enqueued {
            info!(
                conversation_id,
                task_id = %task.id,
                "Enqueued generation task"
            );
        }
        Ok(enqueued)
    }

    /// Stop the generation workers.
    pub fn shutdown(&self) {
        self.runner.shutdown();
    }
}
