//! Orchestration services built on the event bus.

pub mod chat_orchestrator;
pub mod engine;
pub mod event_bus;
pub mod subtask_orchestrator;
pub mod task_orchestrator;

pub use chat_orchestrator::ChatOrchestrator;
pub use engine::{Engine, EngineDeps, EngineSettings};
pub use event_bus::{EventBus, EventHandler};
pub use subtask_orchestrator::SubtaskOrchestrator;
pub use task_orchestrator::TaskOrchestrator;
