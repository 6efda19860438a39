//! Ports: repository and collaborator contracts the engine depends on.
//!
//! Repositories own aggregate lookup and mutation; every write to an
//! aggregate goes through its repository. The `lock` methods hand out
//! the per-aggregate guard that enforces the single-writer discipline:
//! a handler holds the guard across its whole read-check-write
//! sequence, so handlers for the same aggregate never interleave.

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use super::errors::DomainResult;
use super::models::{Chat, ChatId, Message, Subtask, SubtaskId, Task, TaskId};

/// Ownership and lookup of Task aggregates (subtasks by containment).
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Acquire the serialization guard for a task. Cross-task
    /// operations proceed in parallel; same-task operations queue.
    async fn lock(&self, id: TaskId) -> OwnedMutexGuard<()>;

    async fn find(&self, id: TaskId) -> DomainResult<Option<Task>>;

    async fn find_all(&self) -> DomainResult<Vec<Task>>;

    async fn save(&self, task: Task) -> DomainResult<()>;

    async fn remove(&self, id: TaskId) -> DomainResult<()>;

    /// Number of tasks currently stored.
    async fn count(&self) -> DomainResult<u64>;

    /// Resolve a (task, subtask) pair, failing with NotFound for
    /// either missing side.
    async fn get_subtask(
        &self,
        task_id: TaskId,
        subtask_id: SubtaskId,
    ) -> DomainResult<(Task, Subtask)> {
        let task = self
            .find(task_id)
            .await?
            .ok_or(super::errors::DomainError::TaskNotFound(task_id))?;
        let subtask = task
            .subtask(subtask_id)
            .cloned()
            .ok_or(super::errors::DomainError::SubtaskNotFound {
                task_id,
                subtask_id,
            })?;
        Ok((task, subtask))
    }
}

/// Ownership and lookup of Chat aggregates.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Per-chat serialization guard; message intake for one chat is
    /// strictly ordered by acquisition of this lock.
    async fn lock(&self, id: ChatId) -> OwnedMutexGuard<()>;

    async fn find(&self, id: ChatId) -> DomainResult<Option<Chat>>;

    async fn save(&self, chat: Chat) -> DomainResult<()>;

    async fn remove(&self, id: ChatId) -> DomainResult<()>;

    /// The active chat for a subtask, if one exists. A subtask has at
    /// most one active chat at a time.
    async fn find_active_by_subtask(&self, subtask_id: SubtaskId) -> DomainResult<Option<Chat>>;
}

/// Durable storage collaborator for task folders, subtask outputs, and
/// chat logs. Implemented externally; the engine only relies on these
/// semantics.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Create the folder backing a task. Returns its logical path.
    async fn create_task_folder(&self, task: &Task) -> DomainResult<String>;

    /// Persist the task record (full subtask list included).
    async fn save_task(&self, task: &Task) -> DomainResult<()>;

    /// Ensure the working storage for a subtask exists, initializing
    /// it on first use. Returns true if it was created by this call.
    async fn ensure_working_storage(&self, subtask: &Subtask) -> DomainResult<bool>;

    /// Read the persisted output of the subtask at `step`, or None if
    /// it has not produced one.
    async fn read_output(&self, task_id: TaskId, step: u32) -> DomainResult<Option<String>>;

    /// Persist a subtask output. Any previously recorded output is
    /// archived to a timestamped history entry first; no prior output
    /// is ever lost.
    async fn write_output(&self, subtask: &Subtask, value: &str) -> DomainResult<()>;

    /// All archived outputs for the subtask at `step`, oldest first.
    async fn output_history(&self, task_id: TaskId, step: u32) -> DomainResult<Vec<String>>;

    /// Create the backing record for a chat. Returns its logical path.
    async fn create_chat_log(&self, chat: &Chat) -> DomainResult<String>;

    /// Append one message to the chat's backing record. Returns the
    /// record's logical path.
    async fn append_message(&self, chat: &Chat, message: &Message) -> DomainResult<String>;
}

/// Collaborator that renders the seed prompt opening a subtask's chat.
#[async_trait]
pub trait PromptGenerator: Send + Sync {
    async fn initial_prompt(&self, task: &Task, subtask: &Subtask) -> DomainResult<String>;
}

/// Collaborator that produces the assistant's next turn.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, chat: &Chat, last_message: &Message) -> DomainResult<Message>;
}
