//! Typed events and commands exchanged over the event bus.
//!
//! Every envelope carries a kind discriminator, a timestamp, and a
//! correlation id generated once per originating action and propagated
//! unchanged through everything causally derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{
    ChatId, Message, MessageId, SubtaskBlueprint, SubtaskId, SubtaskStatus, TaskId,
};

/// Unique identifier for an event envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier propagated through all events/commands causally derived
/// from one originating action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub fn zero() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Discriminator used for handler registration and dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    // Commands
    CreateTask,
    StartTask,
    StartSubtask,
    CompleteSubtask,
    ApproveSubtask,
    StartChat,
    SubmitMessage,
    // Events
    TaskCreated,
    TaskFolderCreated,
    TaskInitialized,
    TaskLoaded,
    SubtaskStarted,
    SubtaskPaused,
    SubtaskUpdated,
    SubtaskCompleted,
    NextSubtaskTriggered,
    ChatCreated,
    MessageReceived,
    MessageSaved,
    ChatUpdated,
    AgentResponseGenerated,
    WorkApproved,
    HandlerFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateTask => "create_task",
            Self::StartTask => "start_task",
            Self::StartSubtask => "start_subtask",
            Self::CompleteSubtask => "complete_subtask",
            Self::ApproveSubtask => "approve_subtask",
            Self::StartChat => "start_chat",
            Self::SubmitMessage => "submit_message",
            Self::TaskCreated => "task_created",
            Self::TaskFolderCreated => "task_folder_created",
            Self::TaskInitialized => "task_initialized",
            Self::TaskLoaded => "task_loaded",
            Self::SubtaskStarted => "subtask_started",
            Self::SubtaskPaused => "subtask_paused",
            Self::SubtaskUpdated => "subtask_updated",
            Self::SubtaskCompleted => "subtask_completed",
            Self::NextSubtaskTriggered => "next_subtask_triggered",
            Self::ChatCreated => "chat_created",
            Self::MessageReceived => "message_received",
            Self::MessageSaved => "message_saved",
            Self::ChatUpdated => "chat_updated",
            Self::AgentResponseGenerated => "agent_response_generated",
            Self::WorkApproved => "work_approved",
            Self::HandlerFailed => "handler_failed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of a command or event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    // Inbound commands
    CreateTask {
        name: String,
        config: serde_json::Value,
        /// Subtask composition; an empty plan falls back to the
        /// engine's configured default.
        plan: Vec<SubtaskBlueprint>,
        initial_input: Option<String>,
    },
    StartTask {
        task_id: TaskId,
    },
    StartSubtask {
        task_id: TaskId,
        subtask_id: SubtaskId,
    },
    CompleteSubtask {
        task_id: TaskId,
        subtask_id: SubtaskId,
        output: String,
        requires_approval: bool,
    },
    ApproveSubtask {
        task_id: TaskId,
        subtask_id: SubtaskId,
    },
    StartChat {
        task_id: TaskId,
        subtask_id: SubtaskId,
    },
    SubmitMessage {
        chat_id: ChatId,
        content: String,
    },

    // Outbound events
    TaskCreated {
        task_id: TaskId,
        name: String,
    },
    TaskFolderCreated {
        task_id: TaskId,
        folder_path: String,
    },
    TaskInitialized {
        task_id: TaskId,
    },
    TaskLoaded {
        task_id: TaskId,
    },
    SubtaskStarted {
        task_id: TaskId,
        subtask_id: SubtaskId,
        input: Option<String>,
    },
    SubtaskPaused {
        task_id: TaskId,
        subtask_id: SubtaskId,
    },
    SubtaskUpdated {
        task_id: TaskId,
        subtask_id: SubtaskId,
        status: SubtaskStatus,
    },
    SubtaskCompleted {
        task_id: TaskId,
        subtask_id: SubtaskId,
    },
    NextSubtaskTriggered {
        task_id: TaskId,
        completed_subtask_id: SubtaskId,
    },
    ChatCreated {
        task_id: TaskId,
        subtask_id: SubtaskId,
        chat_id: ChatId,
    },
    MessageReceived {
        chat_id: ChatId,
        message: Message,
    },
    MessageSaved {
        chat_id: ChatId,
        message_id: MessageId,
    },
    ChatUpdated {
        chat_id: ChatId,
        last_message_id: MessageId,
    },
    AgentResponseGenerated {
        chat_id: ChatId,
        message: Message,
    },
    WorkApproved {
        chat_id: ChatId,
        task_id: TaskId,
        subtask_id: SubtaskId,
    },
    /// Failure report from a fire-and-forget dispatch.
    HandlerFailed {
        kind: EventKind,
        handler: String,
        error: String,
    },
}

impl EventPayload {
    /// The kind this payload dispatches under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CreateTask { .. } => EventKind::CreateTask,
            Self::StartTask { .. } => EventKind::StartTask,
            Self::StartSubtask { .. } => EventKind::StartSubtask,
            Self::CompleteSubtask { .. } => EventKind::CompleteSubtask,
            Self::ApproveSubtask { .. } => EventKind::ApproveSubtask,
            Self::StartChat { .. } => EventKind::StartChat,
            Self::SubmitMessage { .. } => EventKind::SubmitMessage,
            Self::TaskCreated { .. } => EventKind::TaskCreated,
            Self::TaskFolderCreated { .. } => EventKind::TaskFolderCreated,
            Self::TaskInitialized { .. } => EventKind::TaskInitialized,
            Self::TaskLoaded { .. } => EventKind::TaskLoaded,
            Self::SubtaskStarted { .. } => EventKind::SubtaskStarted,
            Self::SubtaskPaused { .. } => EventKind::SubtaskPaused,
            Self::SubtaskUpdated { .. } => EventKind::SubtaskUpdated,
            Self::SubtaskCompleted { .. } => EventKind::SubtaskCompleted,
            Self::NextSubtaskTriggered { .. } => EventKind::NextSubtaskTriggered,
            Self::ChatCreated { .. } => EventKind::ChatCreated,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::MessageSaved { .. } => EventKind::MessageSaved,
            Self::ChatUpdated { .. } => EventKind::ChatUpdated,
            Self::AgentResponseGenerated { .. } => EventKind::AgentResponseGenerated,
            Self::WorkApproved { .. } => EventKind::WorkApproved,
            Self::HandlerFailed { .. } => EventKind::HandlerFailed,
        }
    }
}

/// Envelope for a command or event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    /// Assigned by the bus at publish time; zero until then.
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    pub payload: EventPayload,
}

impl Event {
    /// A new originating envelope with a fresh correlation id.
    pub fn new(payload: EventPayload) -> Self {
        Self::with_correlation(payload, CorrelationId::new())
    }

    /// An envelope continuing an existing correlation chain.
    pub fn with_correlation(payload: EventPayload, correlation_id: CorrelationId) -> Self {
        Self {
            id: EventId::new(),
            sequence: SequenceNumber::zero(),
            timestamp: Utc::now(),
            correlation_id,
            payload,
        }
    }

    /// Derive a causally related envelope, keeping this correlation id.
    pub fn derive(&self, payload: EventPayload) -> Self {
        Self::with_correlation(payload, self.correlation_id)
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
