//! Domain errors for the stepwise orchestration engine.

use thiserror::Error;

use super::models::{ChatId, SubtaskId, TaskId};

/// Domain-level errors that can occur while handling commands and events.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Subtask not found: {subtask_id} in task {task_id}")]
    SubtaskNotFound {
        task_id: TaskId,
        subtask_id: SubtaskId,
    },

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// A collaborator (storage, prompt generation, agent response) failed.
    #[error("Collaborator '{collaborator}' failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },

    /// One or more event handlers failed during a `publish`. Remaining
    /// handlers still ran; this aggregates what went wrong.
    #[error("{failed} of {total} handler(s) failed for {kind}: {details}")]
    HandlerFailures {
        kind: String,
        failed: usize,
        total: usize,
        details: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for a collaborator failure with a named source.
    pub fn collaborator(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            collaborator,
            message: message.into(),
        }
    }

    /// Shorthand for an invalid transition.
    pub fn invalid_transition(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}
