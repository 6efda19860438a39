//! Filesystem workspace store.
//!
//! Layout, one folder per task:
//!
//! ```text
//! {root}/task_{seq:03}-{slug}/
//!     task.json
//!     subtasks/step_{step:02}_{slug}/
//!         output.json
//!         history/output_{timestamp}.json
//!     chats/{chat_id}.jsonl
//! ```
//!
//! `output.json` always holds the latest output; every overwrite moves
//! the previous value into `history/` first.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Chat, Message, Subtask, Task, TaskId};
use crate::domain::ports::WorkspaceStore;

const TASK_RECORD: &str = "task.json";
const OUTPUT_FILE: &str = "output.json";
const HISTORY_DIR: &str = "history";
const SUBTASKS_DIR: &str = "subtasks";
const CHATS_DIR: &str = "chats";

/// Reduce a title to a filesystem-friendly slug.
fn slugify(title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    slug.trim_matches('_').chars().take(40).collect()
}

pub struct FsWorkspaceStore {
    root: PathBuf,
    /// task id -> task folder, filled on create and on lazy scan.
    dirs: RwLock<HashMap<TaskId, PathBuf>>,
}

impl FsWorkspaceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load every task record found under the workspace root. Used for
    /// crash recovery when an engine restarts over an existing
    /// workspace.
    pub async fn load_tasks(&self) -> DomainResult<Vec<Task>> {
        let mut tasks = Vec::new();
        if !self.root.exists() {
            return Ok(tasks);
        }

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let record = path.join(TASK_RECORD);
            if !record.exists() {
                continue;
            }
            match self.read_task_record(&record).await {
                Ok(task) => {
                    self.dirs.write().await.insert(task.id, path);
                    tasks.push(task);
                }
                Err(err) => {
                    tracing::warn!(path = %record.display(), error = %err, "skipping unreadable task record");
                }
            }
        }
        tasks.sort_by_key(|t| t.seq_number);
        Ok(tasks)
    }

    async fn read_task_record(&self, path: &Path) -> DomainResult<Task> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Resolve a task's folder, scanning the workspace if the index
    /// has no entry (e.g. after a restart).
    async fn task_dir(&self, task_id: TaskId) -> DomainResult<PathBuf> {
        if let Some(dir) = self.dirs.read().await.get(&task_id) {
            return Ok(dir.clone());
        }
        // Rebuild the index from disk.
        self.load_tasks().await?;
        self.dirs
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or(DomainError::TaskNotFound(task_id))
    }

    fn subtask_dir_name(subtask: &Subtask) -> String {
        format!("step_{:02}_{}", subtask.step, slugify(&subtask.title))
    }

    async fn subtask_dir(&self, subtask: &Subtask) -> DomainResult<PathBuf> {
        Ok(self
            .task_dir(subtask.task_id)
            .await?
            .join(SUBTASKS_DIR)
            .join(Self::subtask_dir_name(subtask)))
    }

    /// Locate a subtask dir by step prefix, independent of its title.
    async fn subtask_dir_by_step(
        &self,
        task_id: TaskId,
        step: u32,
    ) -> DomainResult<Option<PathBuf>> {
        let subtasks = self.task_dir(task_id).await?.join(SUBTASKS_DIR);
        if !subtasks.exists() {
            return Ok(None);
        }
        let prefix = format!("step_{step:02}_");
        let mut entries = tokio::fs::read_dir(&subtasks).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl WorkspaceStore for FsWorkspaceStore {
    async fn create_task_folder(&self, task: &Task) -> DomainResult<String> {
        let folder_name = format!("task_{:03}-{}", task.seq_number, slugify(&task.title));
        let dir = self.root.join(folder_name);
        tokio::fs::create_dir_all(&dir).await?;
        self.dirs.write().await.insert(task.id, dir.clone());
        Ok(dir.to_string_lossy().into_owned())
    }

    async fn save_task(&self, task: &Task) -> DomainResult<()> {
        let dir = self.task_dir(task.id).await?;
        let json = serde_json::to_string_pretty(task)?;
        tokio::fs::write(dir.join(TASK_RECORD), json).await?;
        Ok(())
    }

    async fn ensure_working_storage(&self, subtask: &Subtask) -> DomainResult<bool> {
        let dir = self.subtask_dir(subtask).await?;
        if dir.exists() {
            return Ok(false);
        }
        tokio::fs::create_dir_all(dir.join(HISTORY_DIR)).await?;
        Ok(true)
    }

    async fn read_output(&self, task_id: TaskId, step: u32) -> DomainResult<Option<String>> {
        let Some(dir) = self.subtask_dir_by_step(task_id, step).await? else {
            return Ok(None);
        };
        let output = dir.join(OUTPUT_FILE);
        if !output.exists() {
            return Ok(None);
        }
        Ok(Some(tokio::fs::read_to_string(output).await?))
    }

    async fn write_output(&self, subtask: &Subtask, value: &str) -> DomainResult<()> {
        let dir = self.subtask_dir(subtask).await?;
        tokio::fs::create_dir_all(dir.join(HISTORY_DIR)).await?;

        // Archive the previous output before overwriting it.
        let output = dir.join(OUTPUT_FILE);
        if output.exists() {
            let previous = tokio::fs::read_to_string(&output).await?;
            let stamp = Utc::now().format("%Y%m%d_%H%M%S%.3f");
            let archived = dir.join(HISTORY_DIR).join(format!("output_{stamp}.json"));
            tokio::fs::write(archived, previous).await?;
        }

        tokio::fs::write(output, value).await?;
        Ok(())
    }

    async fn output_history(&self, task_id: TaskId, step: u32) -> DomainResult<Vec<String>> {
        let Some(dir) = self.subtask_dir_by_step(task_id, step).await? else {
            return Ok(Vec::new());
        };
        let history = dir.join(HISTORY_DIR);
        if !history.exists() {
            return Ok(Vec::new());
        }

        let mut named = Vec::new();
        let mut entries = tokio::fs::read_dir(&history).await?;
        while let Some(entry) = entries.next_entry().await? {
            named.push((entry.file_name(), entry.path()));
        }
        // Timestamped names sort chronologically.
        named.sort_by(|a, b| a.0.cmp(&b.0));

        let mut values = Vec::new();
        for (_, path) in named {
            values.push(tokio::fs::read_to_string(path).await?);
        }
        Ok(values)
    }

    async fn create_chat_log(&self, chat: &Chat) -> DomainResult<String> {
        let dir = self.task_dir(chat.task_id).await?.join(CHATS_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.jsonl", chat.id));
        tokio::fs::write(&path, "").await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn append_message(&self, chat: &Chat, message: &Message) -> DomainResult<String> {
        let path = self
            .task_dir(chat.task_id)
            .await?
            .join(CHATS_DIR)
            .join(format!("{}.jsonl", chat.id));

        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(path.to_string_lossy().into_owned())
    }
}
