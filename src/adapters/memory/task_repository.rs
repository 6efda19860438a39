//! In-memory task repository.
//!
//! The authoritative task state for a running engine lives here; the
//! workspace store is the durable copy used for crash recovery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskId};
use crate::domain::ports::TaskRepository;

pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, Task>>,
    /// Per-task serialization guards, created lazily.
    guards: Mutex<HashMap<TaskId, Arc<Mutex<()>>>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn lock(&self, id: TaskId) -> OwnedMutexGuard<()> {
        let guard = {
            let mut guards = self.guards.lock().await;
            Arc::clone(guards.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        guard.lock_owned().await
    }

    async fn find(&self, id: TaskId) -> DomainResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn find_all(&self) -> DomainResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.seq_number);
        Ok(tasks)
    }

    async fn save(&self, task: Task) -> DomainResult<()> {
        self.tasks.write().await.insert(task.id, task);
        Ok(())
    }

    async fn remove(&self, id: TaskId) -> DomainResult<()> {
        self.tasks.write().await.remove(&id);
        Ok(())
    }

    async fn count(&self) -> DomainResult<u64> {
        Ok(self.tasks.read().await.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::{SubtaskBlueprint, SubtaskId};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn demo_task() -> Task {
        Task::new("Demo", 0, &[SubtaskBlueprint::new("Step", "desc")])
    }

    #[tokio::test]
    async fn test_save_find_remove() {
        let repo = InMemoryTaskRepository::new();
        let task = demo_task();
        let id = task.id;

        repo.save(task.clone()).await.unwrap();
        assert_eq!(repo.find(id).await.unwrap().unwrap().title, "Demo");
        assert_eq!(repo.count().await.unwrap(), 1);

        repo.remove(id).await.unwrap();
        assert!(repo.find(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_subtask_not_found_errors() {
        let repo = InMemoryTaskRepository::new();
        let task = demo_task();
        let task_id = task.id;
        repo.save(task).await.unwrap();

        let err = repo
            .get_subtask(TaskId::new(), SubtaskId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::TaskNotFound(_)));

        let err = repo
            .get_subtask(task_id, SubtaskId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::SubtaskNotFound { .. }));
    }

    #[tokio::test]
    async fn test_lock_serializes_same_task() {
        let repo = Arc::new(InMemoryTaskRepository::new());
        let id = TaskId::new();
        let concurrent = Arc::new(AtomicU32::new(0));

        let mut joins = Vec::new();
        for _ in 0..4 {
            let repo = Arc::clone(&repo);
            let concurrent = Arc::clone(&concurrent);
            joins.push(tokio::spawn(async move {
                let _guard = repo.lock(id).await;
                let inside = concurrent.fetch_add(1, Ordering::SeqCst);
                assert_eq!(inside, 0, "critical sections interleaved");
                tokio::time::sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for join in joins {
            join.await.unwrap();
        }
    }
}
