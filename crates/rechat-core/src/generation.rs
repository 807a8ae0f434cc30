//! Durable generation execution.
//!
//! A pool of workers pops tasks off the scheduler and runs the model
//! stream for each one, publishing text deltas to the task's channel as
//! they arrive. The run is retryable end to end: an attempt that dies
//! mid-stream is restarted from scratch against the model, but deltas
//! already retained on the channel are suppressed until the new attempt
//! has caught up, so subscribers never see the prefix twice. The
//! terminal `finish` event is published before the assistant message is
//! appended to history; a crash in between is healed on retry because a
//! finished channel short-circuits straight to the history append.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use futures::StreamExt;

use crate::channel::ChannelRegistry;
use crate::error::{CoreError, Result};
use crate::history::ConversationHistory;
use crate::llm::{ChatMessage, CompletionRequest, FinishReason, LlmClient, LlmRetryConfig};
use crate::models::{ChunkEvent, GenerationTask, Message, Role};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub workers: usize,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub retry: LlmRetryConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            retry: LlmRetryConfig::default(),
        }
    }
}

/// Worker pool that executes generation tasks.
pub struct GenerationRunner {
    scheduler: Arc<Scheduler>,
    channels: Arc<ChannelRegistry>,
    history: ConversationHistory,
    llm: Arc<dyn LlmClient>,
    config: GenerationConfig,
    shutdown: broadcast::Sender<()>,
}

impl GenerationRunner {
    pub fn new(
        scheduler: Arc<Scheduler>,
        channels: Arc<ChannelRegistry>,
        history: ConversationHistory,
        llm: Arc<dyn LlmClient>,
        config: GenerationConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            scheduler,
            channels,
            history,
            llm,
            config,
            shutdown,
        }
    }

    /// Spawn the worker tasks. Called once at startup.
    pub fn start(self: &Arc<Self>) {
        info!(workers = self.config.workers, "Starting generation workers");
        for worker_id in 0..self.config.workers {
            let runner = Arc::clone(self);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => {
                            debug!(worker_id, "Worker shutting down");
                            break;
                        }
                        task = runner.scheduler.pop_task() => {
                            match task {
                                Ok(task) => runner.process(task).await,
                                Err(e) => {
                                    error!(worker_id, error = %e, "Failed to pop task");
                                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                                }
                            }
                        }
                    }
                }
            });
        }
    }

    /// Signal all workers to stop after their current task.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    async fn process(&self, task: GenerationTask) {
        info!(task_id = %task.id, conversation_id = %task.conversation_id, "Running generation task");

        let mut attempt: u32 = 0;
        loop {
            match self.run_attempt(&task).await {
                Ok(()) => {
                    if let Err(e) = self.scheduler.complete_task(task.clone()) {
                        error!(task_id = %task.id, error = %e, "Failed to mark task completed");
                    }
                    return;
                }
                Err(e) if attempt < self.config.retry.max_retries && e.is_retryable() => {
                    attempt += 1;
                    let delay = self.config.retry.delay_for(attempt, e.retry_after_secs());
                    warn!(
                        task_id = %task.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Generation attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Generation failed permanently");
                    self.publish_failure(&task, &e);
                    if let Err(e) = self.scheduler.fail_task(task.clone(), e.to_string()) {
                        error!(task_id = %task.id, error = %e, "Failed to mark task failed");
                    }
                    return;
                }
            }
        }
    }

    /// One end-to-end attempt at a task.
    ///
    /// Re-entrant: any amount of prior partial progress on the channel is
    /// tolerated. When the channel is already finished only the history
    /// append can be outstanding, so the model is not called again.
    async fn run_attempt(&self, task: &GenerationTask) -> Result<()> {
        if self.channels.is_finished(&task.id)? {
            debug!(task_id = %task.id, "Channel already finished, reconstructing from log");
            return self.append_assistant_message(task);
        }

        let request = self.build_request(task)?;
        let published = self.channels.retained_text_len(&task.id)?;
        if published > 0 {
            debug!(task_id = %task.id, published, "Resuming with retained prefix suppressed");
        }

        let mut stream = self.llm.complete_stream(request);
        // Characters of this attempt's output seen so far; deltas are
        // suppressed until it passes the already-published prefix.
        let mut seen: usize = 0;
        let mut finished = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            if !chunk.text.is_empty() {
                let count = chunk.text.chars().count();
                if seen + count > published {
                    let skip = published.saturating_sub(seen);
                    let delta: String = chunk.text.chars().skip(skip).collect();
                    self.channels
                        .publish(&task.id, ChunkEvent::text_delta(delta))?;
                }
                seen += count;
            }

            if let Some(reason) = chunk.finish_reason {
                if reason == FinishReason::Error {
                    return Err(CoreError::Llm("stream error: model reported failure".to_string()));
                }
                finished = true;
            }
        }

        if !finished {
            return Err(CoreError::Llm(
                "stream error: ended without finish".to_string(),
            ));
        }
        if seen < published {
            // The model produced less than what subscribers already saw.
            // Keep the longer retained prefix and close the stream on it.
            warn!(task_id = %task.id, seen, published, "Retry produced shorter output than retained prefix");
        }

        // Terminal event first, then the history append. The order means
        // a subscriber can only observe `finish` once the full text is
        // retained, and a crash before the append is repaired by the
        // finished-channel shortcut above.
        self.channels.publish(&task.id, ChunkEvent::Finish)?;
        self.append_assistant_message(task)
    }

    fn build_request(&self, task: &GenerationTask) -> Result<CompletionRequest> {
        let mut messages = Vec::new();
        if let Some(prompt) = &self.config.system_prompt {
            messages.push(ChatMessage::system(prompt));
        }

        for message in self.history.read(&task.conversation_id)? {
            match message.role {
                Role::User => messages.push(ChatMessage::user(message.text())),
                Role::Assistant => messages.push(ChatMessage::assistant(message.text())),
            }
        }
        if messages.iter().all(|m| m.content != task.message.text()) {
            // The triggering message should already be in history; keep
            // the request valid even if that write was lost.
            messages.push(ChatMessage::user(task.message.text()));
        }

        let mut request = CompletionRequest::new(messages);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        Ok(request)
    }

    /// Append the assistant turn built from the channel's retained text.
    ///
    /// The assistant message id is derived from the task id, so a retried
    /// append lands on the idempotent history insert and cannot duplicate
    /// the turn.
    fn append_assistant_message(&self, task: &GenerationTask) -> Result<()> {
        let content = self.channels.retained_text(&task.id)?;
        let message = Message::assistant(format!("{}-assistant", task.id), content);
        self.history.append(&task.conversation_id, &message)?;
        Ok(())
    }

    /// Surface a permanent failure to subscribers and close the stream.
    fn publish_failure(&self, task: &GenerationTask, error: &CoreError) {
        let report = self
            .channels
            .publish(&task.id, ChunkEvent::error(error.to_string()))
            .and_then(|_| self.channels.publish(&task.id, ChunkEvent::Finish));
        if let Err(e) = report {
            error!(task_id = %task.id, error = %e, "Failed to publish failure to channel");
        }
    }
}
