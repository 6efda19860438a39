//! Chat orchestration.
//!
//! Opens the chat for a started subtask, seeds it with the generated
//! prompt, and runs message intake: every message is appended under
//! the chat guard, persisted, announced, and then either treated as an
//! approval or answered by the response generator. Each user message
//! produces at most one assistant turn; the conversation only
//! continues when another message is submitted.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::events::{Event, EventPayload};
use crate::domain::models::{
    Chat, ChatId, ChatMetadata, Message, MessageMetadata, Role, SubtaskId, SubtaskStatus, TaskId,
};
use crate::domain::ports::{
    ChatRepository, PromptGenerator, ResponseGenerator, TaskRepository, WorkspaceStore,
};
use crate::services::event_bus::{EventBus, EventHandler};

pub struct ChatOrchestrator {
    bus: Arc<EventBus>,
    chats: Arc<dyn ChatRepository>,
    tasks: Arc<dyn TaskRepository>,
    workspace: Arc<dyn WorkspaceStore>,
    prompts: Arc<dyn PromptGenerator>,
    responder: Arc<dyn ResponseGenerator>,
    /// A user message containing this marker approves the subtask's
    /// current output instead of prompting another assistant turn.
    approval_marker: String,
}

impl ChatOrchestrator {
    pub fn new(
        bus: Arc<EventBus>,
        chats: Arc<dyn ChatRepository>,
        tasks: Arc<dyn TaskRepository>,
        workspace: Arc<dyn WorkspaceStore>,
        prompts: Arc<dyn PromptGenerator>,
        responder: Arc<dyn ResponseGenerator>,
        approval_marker: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            chats,
            tasks,
            workspace,
            prompts,
            responder,
            approval_marker: approval_marker.into(),
        }
    }

    async fn start_chat(
        &self,
        event: &Event,
        task_id: TaskId,
        subtask_id: SubtaskId,
    ) -> DomainResult<()> {
        // Check-then-create runs under the task guard so racing
        // StartChat deliveries cannot open two active chats for one
        // subtask.
        let (task, subtask, chat_id) = {
            let _guard = self.tasks.lock(task_id).await;

            if let Some(existing) = self.chats.find_active_by_subtask(subtask_id).await? {
                tracing::warn!(
                    subtask_id = %subtask_id,
                    chat_id = %existing.id,
                    "subtask already has an active chat, ignoring start"
                );
                return Ok(());
            }

            let (task, subtask) = self.tasks.get_subtask(task_id, subtask_id).await?;
            if subtask.status != SubtaskStatus::InProgress {
                // The subtask was paused or completed before this
                // detached command ran; opening a chat now would leak
                // one.
                tracing::warn!(
                    subtask_id = %subtask_id,
                    status = %subtask.status,
                    "subtask no longer in progress, not opening a chat"
                );
                return Ok(());
            }

            let chat = Chat::new(task_id, subtask_id).with_metadata(ChatMetadata {
                title: Some(subtask.title.clone()),
                summary: None,
                tags: Vec::new(),
            });
            self.chats.save(chat.clone()).await?;
            self.workspace.create_chat_log(&chat).await?;
            (task, subtask, chat.id)
        };

        self.bus
            .publish(event.derive(EventPayload::ChatCreated {
                task_id,
                subtask_id,
                chat_id,
            }))
            .await?;

        let prompt = self.prompts.initial_prompt(&task, &subtask).await?;
        let seed = Message::seed_prompt(task_id, subtask_id, prompt);
        self.intake(event, chat_id, seed).await
    }

    async fn submit_message(
        &self,
        event: &Event,
        chat_id: ChatId,
        content: &str,
    ) -> DomainResult<()> {
        let chat = self
            .chats
            .find(chat_id)
            .await?
            .ok_or(DomainError::ChatNotFound(chat_id))?;
        let message = Message::new(Role::User, content).with_metadata(MessageMetadata {
            task_id: Some(chat.task_id),
            subtask_id: Some(chat.subtask_id),
            is_prompt: false,
        });
        self.intake(event, chat_id, message).await
    }

    /// Run one message (and the assistant turn it may provoke) through
    /// the chat. Persistence happens under the chat guard; publishing
    /// and generation happen outside it.
    async fn intake(&self, event: &Event, chat_id: ChatId, message: Message) -> DomainResult<()> {
        let mut pending = Some(message);
        while let Some(msg) = pending.take() {
            let chat = {
                let _guard = self.chats.lock(chat_id).await;
                let mut chat = self
                    .chats
                    .find(chat_id)
                    .await?
                    .ok_or(DomainError::ChatNotFound(chat_id))?;
                if !chat.is_active() {
                    return Err(DomainError::invalid_transition(
                        "closed",
                        "active",
                        "closed chats do not accept messages",
                    ));
                }
                chat.push_message(msg.clone());
                self.workspace.append_message(&chat, &msg).await?;
                self.chats.save(chat.clone()).await?;

                // Announced under the guard: an observed
                // last_message_id is always the newest persisted
                // message. No handler of these kinds takes the chat
                // lock.
                self.bus
                    .publish(event.derive(EventPayload::MessageReceived {
                        chat_id,
                        message: msg.clone(),
                    }))
                    .await?;
                self.bus
                    .publish(event.derive(EventPayload::MessageSaved {
                        chat_id,
                        message_id: msg.id,
                    }))
                    .await?;
                self.bus
                    .publish(event.derive(EventPayload::ChatUpdated {
                        chat_id,
                        last_message_id: msg.id,
                    }))
                    .await?;
                chat
            };

            if msg.role != Role::User {
                break;
            }

            // A human approval ends the exchange without another
            // assistant turn. The seed prompt never approves.
            if !msg.metadata.is_prompt && msg.content.contains(&self.approval_marker) {
                return self
                    .bus
                    .publish(event.derive(EventPayload::WorkApproved {
                        chat_id,
                        task_id: chat.task_id,
                        subtask_id: chat.subtask_id,
                    }))
                    .await;
            }

            let reply = self.responder.generate(&chat, &msg).await?;
            self.bus
                .publish(event.derive(EventPayload::AgentResponseGenerated {
                    chat_id,
                    message: reply.clone(),
                }))
                .await?;
            pending = Some(reply);
        }
        Ok(())
    }

    /// Close the subtask's active chat, if any. Idempotent.
    async fn close_for_subtask(&self, subtask_id: SubtaskId) -> DomainResult<()> {
        let Some(active) = self.chats.find_active_by_subtask(subtask_id).await? else {
            return Ok(());
        };

        let _guard = self.chats.lock(active.id).await;
        let mut chat = self
            .chats
            .find(active.id)
            .await?
            .ok_or(DomainError::ChatNotFound(active.id))?;
        if chat.is_active() {
            chat.close();
            self.chats.save(chat).await?;
            tracing::debug!(subtask_id = %subtask_id, "closed chat for subtask");
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ChatOrchestrator {
    fn name(&self) -> &'static str {
        "chat_orchestrator"
    }

    async fn handle(&self, event: &Event) -> DomainResult<()> {
        match &event.payload {
            EventPayload::StartChat {
                task_id,
                subtask_id,
            } => self.start_chat(event, *task_id, *subtask_id).await,
            EventPayload::SubmitMessage { chat_id, content } => {
                self.submit_message(event, *chat_id, content).await
            }
            EventPayload::SubtaskPaused { subtask_id, .. }
            | EventPayload::SubtaskCompleted { subtask_id, .. } => {
                self.close_for_subtask(*subtask_id).await
            }
            _ => Ok(()),
        }
    }
}
