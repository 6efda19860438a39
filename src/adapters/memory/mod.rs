//! In-memory repository adapters.

pub mod chat_repository;
pub mod task_repository;

pub use chat_repository::InMemoryChatRepository;
pub use task_repository::InMemoryTaskRepository;
