//! Domain models for the orchestration engine.

pub mod chat;
pub mod task;

pub use chat::{Chat, ChatId, ChatMetadata, ChatStatus, Message, MessageId, MessageMetadata, Role};
pub use task::{
    Assignees, Subtask, SubtaskBlueprint, SubtaskId, SubtaskStatus, Task, TaskId, TaskStatus,
    ValueKind,
};
