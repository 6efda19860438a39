//! Stepwise: an event-driven orchestration engine for sequential,
//! chat-gated task pipelines.
//!
//! A task is created from a plan of ordered subtasks. Each subtask is
//! worked through its own chat: the engine seeds the chat with a
//! generated prompt, an agent answers, and the subtask completes when
//! its output is recorded (or when a human approves it in-chat). On
//! completion the next subtask starts automatically; the task finishes
//! when its last subtask does.
//!
//! All coordination flows through a typed [`services::EventBus`]:
//! commands go in, the orchestrators react, and every derived event
//! keeps the correlation id of the action that caused it.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stepwise::adapters::agent::{ScriptedResponder, TemplatePromptGenerator};
//! use stepwise::adapters::fs::FsWorkspaceStore;
//! use stepwise::adapters::memory::{InMemoryChatRepository, InMemoryTaskRepository};
//! use stepwise::domain::events::EventPayload;
//! use stepwise::domain::models::SubtaskBlueprint;
//! use stepwise::services::{Engine, EngineDeps, EngineSettings};
//!
//! # async fn run() -> stepwise::domain::errors::DomainResult<()> {
//! let engine = Engine::start(
//!     EngineSettings::default(),
//!     EngineDeps {
//!         tasks: Arc::new(InMemoryTaskRepository::new()),
//!         chats: Arc::new(InMemoryChatRepository::new()),
//!         workspace: Arc::new(FsWorkspaceStore::new("./workspace")),
//!         prompts: Arc::new(TemplatePromptGenerator::new()),
//!         responder: Arc::new(ScriptedResponder::new("done")),
//!     },
//! )
//! .await;
//!
//! engine
//!     .submit(EventPayload::CreateTask {
//!         name: "Quarterly report".to_string(),
//!         config: serde_json::Value::Null,
//!         plan: vec![SubtaskBlueprint::new("Draft", "Write the draft")],
//!         initial_input: None,
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::events::{Event, EventKind, EventPayload};
pub use services::{Engine, EngineDeps, EngineSettings, EventBus, EventHandler};
