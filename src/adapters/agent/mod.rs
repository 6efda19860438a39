//! Agent collaborator adapters.
//!
//! `ScriptedResponder` is the deterministic response generator used in
//! tests and local runs; a production deployment plugs in its own
//! `ResponseGenerator` implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Chat, Message, MessageMetadata, Role, Subtask, Task};
use crate::domain::ports::{PromptGenerator, ResponseGenerator};

/// Deterministic response generator. Replies are selected by substring
/// match against the incoming message, falling back to a default;
/// queued replies (FIFO) take precedence over both.
pub struct ScriptedResponder {
    default_response: String,
    /// Substring pattern -> canned reply.
    responses: Vec<(String, String)>,
    queued: Mutex<Vec<String>>,
    call_count: Mutex<HashMap<String, u32>>,
}

impl ScriptedResponder {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            default_response: default_response.into(),
            responses: Vec::new(),
            queued: Mutex::new(Vec::new()),
            call_count: Mutex::new(HashMap::new()),
        }
    }

    /// Reply with `response` whenever the incoming message contains
    /// `pattern`. Earlier patterns win.
    pub fn with_response(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.push((pattern.into(), response.into()));
        self
    }

    /// Queue a one-shot reply consumed before any pattern matching.
    pub async fn enqueue(&self, response: impl Into<String>) {
        self.queued.lock().await.push(response.into());
    }

    /// How many times a generation was produced for the given chat.
    pub async fn calls_for(&self, chat_key: &str) -> u32 {
        self.call_count
            .lock()
            .await
            .get(chat_key)
            .copied()
            .unwrap_or(0)
    }

    async fn pick(&self, incoming: &str) -> String {
        {
            let mut queued = self.queued.lock().await;
            if !queued.is_empty() {
                return queued.remove(0);
            }
        }
        for (pattern, response) in &self.responses {
            if incoming.contains(pattern.as_str()) {
                return response.clone();
            }
        }
        self.default_response.clone()
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedResponder {
    async fn generate(&self, chat: &Chat, last_message: &Message) -> DomainResult<Message> {
        let content = self.pick(&last_message.content).await;
        *self
            .call_count
            .lock()
            .await
            .entry(chat.id.to_string())
            .or_insert(0) += 1;

        Ok(
            Message::new(Role::Assistant, content).with_metadata(MessageMetadata {
                task_id: Some(chat.task_id),
                subtask_id: Some(chat.subtask_id),
                is_prompt: false,
            }),
        )
    }
}

/// Renders the seed prompt that opens a subtask's chat from the task
/// and subtask descriptions.
pub struct TemplatePromptGenerator;

impl TemplatePromptGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemplatePromptGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PromptGenerator for TemplatePromptGenerator {
    async fn initial_prompt(&self, task: &Task, subtask: &Subtask) -> DomainResult<String> {
        let mut prompt = format!(
            "Task: {}\nStep {}: {}\n\n{}",
            task.title,
            subtask.step + 1,
            subtask.title,
            subtask.description
        );
        if subtask.assignees.requires_approval() {
            prompt.push_str("\n\nThis step requires an explicit approval before it completes.");
        }
        Ok(prompt)
    }
}
