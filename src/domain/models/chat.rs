//! Chat and Message domain models.
//!
//! Each subtask is worked through a conversational channel. Messages
//! are append-only; a chat is closed when its subtask completes or is
//! paused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{SubtaskId, TaskId};

/// Unique identifier for a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message (or drives a subtask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    User,
    FunctionExecutor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::User => "user",
            Self::FunctionExecutor => "function_executor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Active,
    Closed,
}

impl ChatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata linking a message back to its task/subtask.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub task_id: Option<TaskId>,
    pub subtask_id: Option<SubtaskId>,
    /// True for the synthesized seed prompt that opens a chat.
    #[serde(default)]
    pub is_prompt: bool,
}

/// A single, immutable chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The seed prompt for a subtask's chat.
    pub fn seed_prompt(task_id: TaskId, subtask_id: SubtaskId, content: impl Into<String>) -> Self {
        Self::new(Role::User, content).with_metadata(MessageMetadata {
            task_id: Some(task_id),
            subtask_id: Some(subtask_id),
            is_prompt: true,
        })
    }
}

/// Optional descriptive metadata for a chat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub title: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The conversational channel for one (task, subtask) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub task_id: TaskId,
    pub subtask_id: SubtaskId,
    pub messages: Vec<Message>,
    pub status: ChatStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Option<ChatMetadata>,
}

impl Chat {
    pub fn new(task_id: TaskId, subtask_id: SubtaskId) -> Self {
        let now = Utc::now();
        Self {
            id: ChatId::new(),
            task_id,
            subtask_id,
            messages: Vec::new(),
            status: ChatStatus::Active,
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ChatMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == ChatStatus::Active
    }

    /// Append a message. Messages are never mutated or removed.
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Most recent message authored by the given role.
    pub fn last_message_by(&self, role: Role) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == role)
    }

    pub fn close(&mut self) {
        self.status = ChatStatus::Closed;
        self.updated_at = Utc::now();
    }
}
