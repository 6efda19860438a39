//! Task and Subtask domain models.
//!
//! A task is a long-running unit of work made of strictly ordered
//! subtasks. Subtasks are materialized when the task is created and
//! advance one at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chat::Role;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubtaskId(pub Uuid);

impl SubtaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a task over its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task exists but its workspace is not yet set up.
    Created,
    /// Workspace ready; no subtask in flight yet.
    Initialized,
    /// A subtask has been started.
    InProgress,
    /// All subtasks completed.
    Completed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    /// Valid transitions from this status. Initialized and InProgress
    /// are idempotent to re-enter.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::Created => vec![Self::Initialized],
            Self::Initialized => vec![Self::Initialized, Self::InProgress],
            Self::InProgress => vec![Self::InProgress, Self::Completed],
            Self::Completed => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a subtask. Forward progress is Pending -> InProgress ->
/// Completed; pausing returns an in-flight subtask to Pending.
/// Completed is terminal and never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl Default for SubtaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn valid_transitions(&self) -> Vec<SubtaskStatus> {
        match self {
            Self::Pending => vec![Self::InProgress],
            Self::InProgress => vec![Self::Pending, Self::Completed],
            Self::Completed => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a subtask's declared input/output. Only text is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Text,
}

impl Default for ValueKind {
    fn default() -> Self {
        Self::Text
    }
}

/// Responsible parties for a subtask: the agent capability that drives
/// it, and optionally a human whose approval gates completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignees {
    pub agent: Role,
    pub human: Option<Role>,
}

impl Default for Assignees {
    fn default() -> Self {
        Self {
            agent: Role::Assistant,
            human: None,
        }
    }
}

impl Assignees {
    /// Whether completing this subtask requires an explicit approval.
    pub fn requires_approval(&self) -> bool {
        self.human.is_some()
    }
}

/// Template for a subtask, used when materializing a task's plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskBlueprint {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub assignees: Assignees,
    #[serde(default)]
    pub input_kind: ValueKind,
    #[serde(default)]
    pub output_kind: ValueKind,
}

impl SubtaskBlueprint {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            assignees: Assignees::default(),
            input_kind: ValueKind::Text,
            output_kind: ValueKind::Text,
        }
    }

    /// Require a human approval for this step.
    pub fn with_reviewer(mut self, human: Role) -> Self {
        self.assignees.human = Some(human);
        self
    }

    pub fn with_agent(mut self, agent: Role) -> Self {
        self.assignees.agent = agent;
        self
    }
}

/// One ordered step of a task, executed through a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub task_id: TaskId,
    /// Position within the task; unique and contiguous from 0.
    pub step: u32,
    pub title: String,
    pub description: String,
    pub assignees: Assignees,
    pub status: SubtaskStatus,
    pub input_kind: ValueKind,
    pub output_kind: ValueKind,
}

impl Subtask {
    /// Materialize a subtask from a blueprint at a given step.
    pub fn from_blueprint(task_id: TaskId, step: u32, blueprint: &SubtaskBlueprint) -> Self {
        Self {
            id: SubtaskId::new(),
            task_id,
            step,
            title: blueprint.title.clone(),
            description: blueprint.description.clone(),
            assignees: blueprint.assignees.clone(),
            status: SubtaskStatus::Pending,
            input_kind: blueprint.input_kind,
            output_kind: blueprint.output_kind,
        }
    }

    pub fn transition_to(&mut self, new_status: SubtaskStatus) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition subtask from {} to {}",
                self.status, new_status
            ));
        }
        self.status = new_status;
        Ok(())
    }
}

/// Aggregate root: a unit of work composed of ordered subtasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Creation order within the workspace.
    pub seq_number: u64,
    pub title: String,
    pub status: TaskStatus,
    /// Set only while a subtask is in flight.
    pub current_subtask_id: Option<SubtaskId>,
    pub subtasks: Vec<Subtask>,
    /// Opaque configuration, not interpreted by the engine.
    pub config: serde_json::Value,
    /// Input handed to the first subtask when no prior output exists.
    pub initial_input: Option<String>,
    /// Workspace folder, set once storage is created.
    pub folder_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with its full subtask sequence materialized from
    /// the given plan.
    pub fn new(title: impl Into<String>, seq_number: u64, plan: &[SubtaskBlueprint]) -> Self {
        let id = TaskId::new();
        let now = Utc::now();
        let subtasks = plan
            .iter()
            .enumerate()
            .map(|(step, bp)| Subtask::from_blueprint(id, step as u32, bp))
            .collect();
        Self {
            id,
            seq_number,
            title: title.into(),
            status: TaskStatus::Created,
            current_subtask_id: None,
            subtasks,
            config: serde_json::Value::Null,
            initial_input: None,
            folder_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_initial_input(mut self, input: impl Into<String>) -> Self {
        self.initial_input = Some(input.into());
        self
    }

    pub fn subtask(&self, id: SubtaskId) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn subtask_mut(&mut self, id: SubtaskId) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    pub fn subtask_at_step(&self, step: u32) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.step == step)
    }

    /// The in-flight subtask, if any.
    pub fn current_subtask(&self) -> Option<&Subtask> {
        self.current_subtask_id.and_then(|id| self.subtask(id))
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), String> {
        if !self.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition task from {} to {}",
                self.status, new_status
            ));
        }
        self.status = new_status;
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Check aggregate invariants: contiguous 0-based steps, at most
    /// one InProgress subtask, and current_subtask_id pointing at it.
    pub fn validate(&self) -> Result<(), String> {
        let mut steps: Vec<u32> = self.subtasks.iter().map(|s| s.step).collect();
        steps.sort_unstable();
        for (expected, step) in steps.iter().enumerate() {
            if *step != expected as u32 {
                return Err(format!(
                    "Subtask steps must be contiguous from 0, found {step} at position {expected}"
                ));
            }
        }

        let in_progress: Vec<&Subtask> = self
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::InProgress)
            .collect();
        if in_progress.len() > 1 {
            return Err("At most one subtask may be in progress".to_string());
        }

        if let Some(current_id) = self.current_subtask_id {
            if self.status != TaskStatus::InProgress {
                return Err(format!(
                    "current_subtask_id set while task is {}",
                    self.status
                ));
            }
            match self.subtask(current_id) {
                Some(s) if s.status == SubtaskStatus::InProgress => {}
                Some(s) => {
                    return Err(format!(
                        "current subtask {} has status {}, expected in_progress",
                        current_id, s.status
                    ));
                }
                None => return Err(format!("current subtask {current_id} does not exist")),
            }
        }

        Ok(())
    }
}
