//! Engine assembly.
//!
//! Builds the three orchestrators over a shared event bus and wires
//! their subscriptions. Everything after that is driven by publishing
//! commands on the bus.

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::events::{Event, EventKind, EventPayload};
use crate::domain::models::SubtaskBlueprint;
use crate::domain::ports::{
    ChatRepository, PromptGenerator, ResponseGenerator, TaskRepository, WorkspaceStore,
};
use crate::services::chat_orchestrator::ChatOrchestrator;
use crate::services::event_bus::EventBus;
use crate::services::subtask_orchestrator::SubtaskOrchestrator;
use crate::services::task_orchestrator::TaskOrchestrator;

/// Collaborators the engine is assembled from.
pub struct EngineDeps {
    pub tasks: Arc<dyn TaskRepository>,
    pub chats: Arc<dyn ChatRepository>,
    pub workspace: Arc<dyn WorkspaceStore>,
    pub prompts: Arc<dyn PromptGenerator>,
    pub responder: Arc<dyn ResponseGenerator>,
}

/// Behavioral settings, usually sourced from `EngineConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub approval_marker: String,
    pub default_plan: Vec<SubtaskBlueprint>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            approval_marker: "APPROVE".to_string(),
            default_plan: Vec::new(),
        }
    }
}

/// A fully wired orchestration engine.
pub struct Engine {
    bus: Arc<EventBus>,
}

impl Engine {
    pub async fn start(settings: EngineSettings, deps: EngineDeps) -> Self {
        let bus = Arc::new(EventBus::new());

        let task_orchestrator = Arc::new(TaskOrchestrator::new(
            Arc::clone(&bus),
            Arc::clone(&deps.tasks),
            Arc::clone(&deps.workspace),
            settings.default_plan,
        ));
        let subtask_orchestrator = Arc::new(SubtaskOrchestrator::new(
            Arc::clone(&bus),
            Arc::clone(&deps.tasks),
            Arc::clone(&deps.chats),
            Arc::clone(&deps.workspace),
        ));
        let chat_orchestrator = Arc::new(ChatOrchestrator::new(
            Arc::clone(&bus),
            Arc::clone(&deps.chats),
            Arc::clone(&deps.tasks),
            Arc::clone(&deps.workspace),
            Arc::clone(&deps.prompts),
            Arc::clone(&deps.responder),
            settings.approval_marker,
        ));

        for kind in [
            EventKind::CreateTask,
            EventKind::StartTask,
            EventKind::NextSubtaskTriggered,
        ] {
            bus.subscribe(kind, task_orchestrator.clone()).await;
        }
        for kind in [
            EventKind::StartSubtask,
            EventKind::CompleteSubtask,
            EventKind::ApproveSubtask,
            EventKind::WorkApproved,
        ] {
            bus.subscribe(kind, subtask_orchestrator.clone()).await;
        }
        for kind in [
            EventKind::StartChat,
            EventKind::SubmitMessage,
            EventKind::SubtaskPaused,
            EventKind::SubtaskCompleted,
        ] {
            bus.subscribe(kind, chat_orchestrator.clone()).await;
        }

        tracing::info!("engine started");
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Publish a command as a fresh originating action and wait for
    /// its whole cascade.
    pub async fn submit(&self, payload: EventPayload) -> DomainResult<()> {
        self.bus.publish(Event::new(payload)).await
    }
}
