//! Task lifecycle orchestration.
//!
//! Reacts to `CreateTask`, `StartTask`, and `NextSubtaskTriggered`.
//! Creation materializes the plan, sets up workspace storage, and
//! auto-starts the task; advancement starts the next step or marks the
//! task completed when the last step finishes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::events::{Event, EventPayload};
use crate::domain::models::{SubtaskBlueprint, SubtaskId, SubtaskStatus, Task, TaskId, TaskStatus};
use crate::domain::ports::{TaskRepository, WorkspaceStore};
use crate::services::event_bus::{EventBus, EventHandler};

pub struct TaskOrchestrator {
    bus: Arc<EventBus>,
    tasks: Arc<dyn TaskRepository>,
    workspace: Arc<dyn WorkspaceStore>,
    /// Plan used when a CreateTask command carries an empty one.
    default_plan: Vec<SubtaskBlueprint>,
    /// Serializes creation so sequence numbers are assigned uniquely.
    creation_guard: tokio::sync::Mutex<()>,
}

impl TaskOrchestrator {
    pub fn new(
        bus: Arc<EventBus>,
        tasks: Arc<dyn TaskRepository>,
        workspace: Arc<dyn WorkspaceStore>,
        default_plan: Vec<SubtaskBlueprint>,
    ) -> Self {
        Self {
            bus,
            tasks,
            workspace,
            default_plan,
            creation_guard: tokio::sync::Mutex::new(()),
        }
    }

    async fn create_task(
        &self,
        event: &Event,
        name: &str,
        config: &serde_json::Value,
        plan: &[SubtaskBlueprint],
        initial_input: Option<&str>,
    ) -> DomainResult<()> {
        let plan = if plan.is_empty() {
            self.default_plan.as_slice()
        } else {
            plan
        };
        if plan.is_empty() {
            return Err(DomainError::collaborator(
                "task_orchestrator",
                "cannot create a task with an empty plan and no default plan configured",
            ));
        }

        let _creating = self.creation_guard.lock().await;
        // One past the highest live sequence number; a plain count
        // could reuse a removed task's slot (and folder name).
        let seq_number = self
            .tasks
            .find_all()
            .await?
            .iter()
            .map(|t| t.seq_number)
            .max()
            .unwrap_or(0)
            + 1;
        let mut task = Task::new(name, seq_number, plan).with_config(config.clone());
        if let Some(input) = initial_input {
            task = task.with_initial_input(input);
        }
        let task_id = task.id;

        let folder_path = self.workspace.create_task_folder(&task).await?;
        task.folder_path = Some(folder_path.clone());
        self.bus
            .publish(event.derive(EventPayload::TaskFolderCreated {
                task_id,
                folder_path,
            }))
            .await?;

        self.tasks.save(task.clone()).await?;
        self.bus
            .publish(event.derive(EventPayload::TaskCreated {
                task_id,
                name: name.to_string(),
            }))
            .await?;

        task.transition_to(TaskStatus::Initialized)
            .map_err(|reason| DomainError::invalid_transition("created", "initialized", reason))?;
        self.workspace.save_task(&task).await?;
        self.tasks.save(task).await?;
        self.bus
            .publish(event.derive(EventPayload::TaskInitialized { task_id }))
            .await?;

        tracing::info!(task_id = %task_id, seq_number, "task created");
        drop(_creating);

        // Tasks start as soon as they are initialized.
        self.bus
            .publish(event.derive(EventPayload::StartTask { task_id }))
            .await
    }

    async fn start_task(&self, event: &Event, task_id: TaskId) -> DomainResult<()> {
        // Locate the first incomplete step; the guard is released
        // before the follow-up command so the subtask handler can
        // re-acquire it.
        let next_subtask = {
            let _guard = self.tasks.lock(task_id).await;
            let task = self
                .tasks
                .find(task_id)
                .await?
                .ok_or(DomainError::TaskNotFound(task_id))?;

            task.subtasks
                .iter()
                .filter(|s| s.status != SubtaskStatus::Completed)
                .min_by_key(|s| s.step)
                .map(|s| s.id)
        };

        self.bus
            .publish(event.derive(EventPayload::TaskLoaded { task_id }))
            .await?;

        match next_subtask {
            // Starting a subtask opens a new correlation chain.
            Some(subtask_id) => {
                self.bus
                    .publish(Event::new(EventPayload::StartSubtask {
                        task_id,
                        subtask_id,
                    }))
                    .await
            }
            None => {
                tracing::info!(task_id = %task_id, "start requested but no incomplete subtasks remain");
                Ok(())
            }
        }
    }

    /// Start the step after a completed one, or finish the task when
    /// the last step just completed.
    async fn advance(
        &self,
        event: &Event,
        task_id: TaskId,
        completed_subtask_id: SubtaskId,
    ) -> DomainResult<()> {
        let next_subtask = {
            let _guard = self.tasks.lock(task_id).await;
            let mut task = self
                .tasks
                .find(task_id)
                .await?
                .ok_or(DomainError::TaskNotFound(task_id))?;

            let completed =
                task.subtask(completed_subtask_id)
                    .ok_or(DomainError::SubtaskNotFound {
                        task_id,
                        subtask_id: completed_subtask_id,
                    })?;
            if completed.status != SubtaskStatus::Completed {
                return Err(DomainError::invalid_transition(
                    completed.status.as_str(),
                    "completed",
                    "cannot advance past a subtask that has not completed",
                ));
            }

            let next = task.subtask_at_step(completed.step + 1).map(|s| s.id);
            if next.is_none() {
                if task.status == TaskStatus::Completed {
                    // Duplicate trigger (re-completion or a straggling
                    // approval) after the task already finished.
                    tracing::debug!(task_id = %task_id, "task already completed, nothing to advance");
                } else {
                    task.transition_to(TaskStatus::Completed).map_err(|reason| {
                        DomainError::invalid_transition(task.status.as_str(), "completed", reason)
                    })?;
                    tracing::info!(task_id = %task_id, "all subtasks completed, task finished");
                }
            }
            task.touch();
            self.workspace.save_task(&task).await?;
            self.tasks.save(task).await?;
            next
        };

        match next_subtask {
            Some(subtask_id) => {
                self.bus
                    .publish(Event::new(EventPayload::StartSubtask {
                        task_id,
                        subtask_id,
                    }))
                    .await
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EventHandler for TaskOrchestrator {
    fn name(&self) -> &'static str {
        "task_orchestrator"
    }

    async fn handle(&self, event: &Event) -> DomainResult<()> {
        match &event.payload {
            EventPayload::CreateTask {
                name,
                config,
                plan,
                initial_input,
            } => {
                self.create_task(event, name, config, plan, initial_input.as_deref())
                    .await
            }
            EventPayload::StartTask { task_id } => self.start_task(event, *task_id).await,
            EventPayload::NextSubtaskTriggered {
                task_id,
                completed_subtask_id,
            } => self.advance(event, *task_id, *completed_subtask_id).await,
            _ => Ok(()),
        }
    }
}
