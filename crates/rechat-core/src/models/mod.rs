pub mod event;
pub mod message;
pub mod task;

pub use event::ChunkEvent;
pub use message::{Message, MessagePart, Role};
pub use task::{GenerationTask, TaskStatus};
