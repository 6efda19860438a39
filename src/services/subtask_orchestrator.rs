//! Subtask lifecycle orchestration.
//!
//! Reacts to `StartSubtask`, `CompleteSubtask`, `ApproveSubtask`, and
//! `WorkApproved`. All task mutation happens under the task's
//! serialization guard; follow-up commands are published only after
//! the guard is released.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::events::{Event, EventPayload};
use crate::domain::models::{ChatId, Role, SubtaskId, SubtaskStatus, TaskId, TaskStatus};
use crate::domain::ports::{ChatRepository, TaskRepository, WorkspaceStore};
use crate::services::event_bus::{EventBus, EventHandler};

pub struct SubtaskOrchestrator {
    bus: Arc<EventBus>,
    tasks: Arc<dyn TaskRepository>,
    chats: Arc<dyn ChatRepository>,
    workspace: Arc<dyn WorkspaceStore>,
}

/// What a start attempt decided while the task guard was held.
enum StartOutcome {
    AlreadyRunning,
    Started {
        paused_sibling: Option<SubtaskId>,
        input: Option<String>,
    },
}

impl SubtaskOrchestrator {
    pub fn new(
        bus: Arc<EventBus>,
        tasks: Arc<dyn TaskRepository>,
        chats: Arc<dyn ChatRepository>,
        workspace: Arc<dyn WorkspaceStore>,
    ) -> Self {
        Self {
            bus,
            tasks,
            chats,
            workspace,
        }
    }

    async fn start_subtask(
        &self,
        event: &Event,
        task_id: TaskId,
        subtask_id: SubtaskId,
    ) -> DomainResult<()> {
        let outcome = {
            let _guard = self.tasks.lock(task_id).await;
            let mut task = self
                .tasks
                .find(task_id)
                .await?
                .ok_or(DomainError::TaskNotFound(task_id))?;
            let subtask = task
                .subtask(subtask_id)
                .cloned()
                .ok_or(DomainError::SubtaskNotFound {
                    task_id,
                    subtask_id,
                })?;

            if subtask.status == SubtaskStatus::InProgress
                && task.current_subtask_id == Some(subtask_id)
            {
                // Duplicate command; absorb it.
                tracing::warn!(
                    task_id = %task_id,
                    subtask_id = %subtask_id,
                    "subtask is already in progress, ignoring start"
                );
                StartOutcome::AlreadyRunning
            } else {
                if subtask.status == SubtaskStatus::Completed {
                    return Err(DomainError::invalid_transition(
                        "completed",
                        "in_progress",
                        "completed subtasks never restart",
                    ));
                }

                // At most one subtask runs at a time; pause any other
                // in-flight sibling first.
                let mut paused_sibling = None;
                if let Some(current_id) = task.current_subtask_id {
                    if current_id != subtask_id {
                        let current =
                            task.subtask_mut(current_id)
                                .ok_or(DomainError::SubtaskNotFound {
                                    task_id,
                                    subtask_id: current_id,
                                })?;
                        current.transition_to(SubtaskStatus::Pending).map_err(|reason| {
                            DomainError::invalid_transition("in_progress", "pending", reason)
                        })?;
                        paused_sibling = Some(current_id);
                    }
                }

                let input = if subtask.step == 0 {
                    task.initial_input.clone()
                } else {
                    self.workspace.read_output(task_id, subtask.step - 1).await?
                };

                let created = self.workspace.ensure_working_storage(&subtask).await?;
                if created {
                    tracing::debug!(
                        task_id = %task_id,
                        subtask_id = %subtask_id,
                        step = subtask.step,
                        "created working storage"
                    );
                }

                let entry = task
                    .subtask_mut(subtask_id)
                    .ok_or(DomainError::SubtaskNotFound {
                        task_id,
                        subtask_id,
                    })?;
                entry.transition_to(SubtaskStatus::InProgress).map_err(|reason| {
                    DomainError::invalid_transition(subtask.status.as_str(), "in_progress", reason)
                })?;
                task.current_subtask_id = Some(subtask_id);
                task.transition_to(TaskStatus::InProgress).map_err(|reason| {
                    DomainError::invalid_transition(task.status.as_str(), "in_progress", reason)
                })?;

                self.workspace.save_task(&task).await?;
                self.tasks.save(task).await?;
                StartOutcome::Started {
                    paused_sibling,
                    input,
                }
            }
        };

        let StartOutcome::Started {
            paused_sibling,
            input,
        } = outcome
        else {
            return Ok(());
        };

        if let Some(paused_id) = paused_sibling {
            self.bus
                .publish(event.derive(EventPayload::SubtaskPaused {
                    task_id,
                    subtask_id: paused_id,
                }))
                .await?;
        }
        // The first conversational turn can be slow; chat creation
        // runs detached so it never delays subtask-started signalling.
        // Its failures come back as HandlerFailed events.
        self.bus.publish_detached(event.derive(EventPayload::StartChat {
            task_id,
            subtask_id,
        }));

        self.bus
            .publish(event.derive(EventPayload::SubtaskUpdated {
                task_id,
                subtask_id,
                status: SubtaskStatus::InProgress,
            }))
            .await?;
        self.bus
            .publish(event.derive(EventPayload::SubtaskStarted {
                task_id,
                subtask_id,
                input,
            }))
            .await
    }

    async fn complete_subtask(
        &self,
        event: &Event,
        task_id: TaskId,
        subtask_id: SubtaskId,
        output: &str,
        requires_approval: bool,
    ) -> DomainResult<()> {
        let completed_now = {
            let _guard = self.tasks.lock(task_id).await;
            let mut task = self
                .tasks
                .find(task_id)
                .await?
                .ok_or(DomainError::TaskNotFound(task_id))?;
            let subtask = task
                .subtask(subtask_id)
                .cloned()
                .ok_or(DomainError::SubtaskNotFound {
                    task_id,
                    subtask_id,
                })?;

            if subtask.status == SubtaskStatus::Completed {
                // Re-completion is idempotent: the recorded output and
                // its history stay untouched.
                tracing::warn!(
                    task_id = %task_id,
                    subtask_id = %subtask_id,
                    "subtask already completed, skipping persistence"
                );
                false
            } else {
                if subtask.status != SubtaskStatus::InProgress {
                    return Err(DomainError::invalid_transition(
                        subtask.status.as_str(),
                        "completed",
                        "only an in-progress subtask can complete",
                    ));
                }

                self.workspace.write_output(&subtask, output).await?;

                let entry = task
                    .subtask_mut(subtask_id)
                    .ok_or(DomainError::SubtaskNotFound {
                        task_id,
                        subtask_id,
                    })?;
                entry.transition_to(SubtaskStatus::Completed).map_err(|reason| {
                    DomainError::invalid_transition("in_progress", "completed", reason)
                })?;
                if task.current_subtask_id == Some(subtask_id) {
                    task.current_subtask_id = None;
                }
                task.touch();

                self.workspace.save_task(&task).await?;
                self.tasks.save(task).await?;
                true
            }
        };

        if completed_now {
            self.bus
                .publish(event.derive(EventPayload::SubtaskUpdated {
                    task_id,
                    subtask_id,
                    status: SubtaskStatus::Completed,
                }))
                .await?;
            self.bus
                .publish(event.derive(EventPayload::SubtaskCompleted {
                    task_id,
                    subtask_id,
                }))
                .await?;
        }

        // An approval-gated completion holds the pipeline here until
        // ApproveSubtask (or an in-chat approval) arrives.
        if requires_approval {
            tracing::info!(
                task_id = %task_id,
                subtask_id = %subtask_id,
                "completion recorded, awaiting approval before advancing"
            );
            return Ok(());
        }

        self.bus
            .publish(event.derive(EventPayload::NextSubtaskTriggered {
                task_id,
                completed_subtask_id: subtask_id,
            }))
            .await
    }

    async fn approve_subtask(
        &self,
        event: &Event,
        task_id: TaskId,
        subtask_id: SubtaskId,
    ) -> DomainResult<()> {
        {
            let _guard = self.tasks.lock(task_id).await;
            let (_, subtask) = self.tasks.get_subtask(task_id, subtask_id).await?;
            if subtask.status != SubtaskStatus::Completed {
                return Err(DomainError::invalid_transition(
                    subtask.status.as_str(),
                    "approved",
                    "only a completed subtask can be approved",
                ));
            }
        }

        tracing::info!(task_id = %task_id, subtask_id = %subtask_id, "subtask approved");
        self.bus
            .publish(event.derive(EventPayload::NextSubtaskTriggered {
                task_id,
                completed_subtask_id: subtask_id,
            }))
            .await
    }

    /// An in-chat approval completes the subtask with the assistant's
    /// latest message as its output, no further gate applied.
    async fn work_approved(
        &self,
        event: &Event,
        chat_id: ChatId,
        task_id: TaskId,
        subtask_id: SubtaskId,
    ) -> DomainResult<()> {
        let chat = self
            .chats
            .find(chat_id)
            .await?
            .ok_or(DomainError::ChatNotFound(chat_id))?;
        let output = match chat.last_message_by(Role::Assistant) {
            Some(message) => message.content.clone(),
            None => {
                tracing::warn!(chat_id = %chat_id, "approval with no assistant output, recording empty output");
                String::new()
            }
        };

        self.bus
            .publish(event.derive(EventPayload::CompleteSubtask {
                task_id,
                subtask_id,
                output,
                requires_approval: false,
            }))
            .await
    }
}

#[async_trait]
impl EventHandler for SubtaskOrchestrator {
    fn name(&self) -> &'static str {
        "subtask_orchestrator"
    }

    async fn handle(&self, event: &Event) -> DomainResult<()> {
        match &event.payload {
            EventPayload::StartSubtask {
                task_id,
                subtask_id,
            } => self.start_subtask(event, *task_id, *subtask_id).await,
            EventPayload::CompleteSubtask {
                task_id,
                subtask_id,
                output,
                requires_approval,
            } => {
                self.complete_subtask(event, *task_id, *subtask_id, output, *requires_approval)
                    .await
            }
            EventPayload::ApproveSubtask {
                task_id,
                subtask_id,
            } => self.approve_subtask(event, *task_id, *subtask_id).await,
            EventPayload::WorkApproved {
                chat_id,
                task_id,
                subtask_id,
            } => {
                self.work_approved(event, *chat_id, *task_id, *subtask_id)
                    .await
            }
            _ => Ok(()),
        }
    }
}
