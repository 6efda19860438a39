//! In-memory chat repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Chat, ChatId, SubtaskId};
use crate::domain::ports::ChatRepository;

pub struct InMemoryChatRepository {
    chats: RwLock<HashMap<ChatId, Chat>>,
    guards: Mutex<HashMap<ChatId, Arc<Mutex<()>>>>,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self {
            chats: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryChatRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatRepository for InMemoryChatRepository {
    async fn lock(&self, id: ChatId) -> OwnedMutexGuard<()> {
        let guard = {
            let mut guards = self.guards.lock().await;
            Arc::clone(guards.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        guard.lock_owned().await
    }

    async fn find(&self, id: ChatId) -> DomainResult<Option<Chat>> {
        Ok(self.chats.read().await.get(&id).cloned())
    }

    async fn save(&self, chat: Chat) -> DomainResult<()> {
        self.chats.write().await.insert(chat.id, chat);
        Ok(())
    }

    async fn remove(&self, id: ChatId) -> DomainResult<()> {
        self.chats.write().await.remove(&id);
        Ok(())
    }

    async fn find_active_by_subtask(&self, subtask_id: SubtaskId) -> DomainResult<Option<Chat>> {
        Ok(self
            .chats
            .read()
            .await
            .values()
            .find(|c| c.subtask_id == subtask_id && c.is_active())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskId;

    #[tokio::test]
    async fn test_save_and_find_active_by_subtask() {
        let repo = InMemoryChatRepository::new();
        let subtask_id = SubtaskId::new();

        let mut closed = Chat::new(TaskId::new(), subtask_id);
        closed.close();
        repo.save(closed).await.unwrap();

        // No active chat yet
        assert!(repo
            .find_active_by_subtask(subtask_id)
            .await
            .unwrap()
            .is_none());

        let active = Chat::new(TaskId::new(), subtask_id);
        let active_id = active.id;
        repo.save(active).await.unwrap();

        let found = repo.find_active_by_subtask(subtask_id).await.unwrap();
        assert_eq!(found.unwrap().id, active_id);
    }
}
