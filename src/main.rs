//! Demo driver: runs a two-step pipeline end to end against a local
//! workspace directory.

use std::sync::Arc;

use anyhow::Context;

use stepwise::adapters::agent::{ScriptedResponder, TemplatePromptGenerator};
use stepwise::adapters::fs::FsWorkspaceStore;
use stepwise::adapters::memory::{InMemoryChatRepository, InMemoryTaskRepository};
use stepwise::domain::events::EventPayload;
use stepwise::domain::models::{Role, SubtaskBlueprint};
use stepwise::infrastructure::config::EngineConfig;
use stepwise::infrastructure::logging;
use stepwise::services::{Engine, EngineDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("stepwise=info");

    let config = match std::env::var("STEPWISE_CONFIG") {
        Ok(path) => EngineConfig::load_from(&path)
            .with_context(|| format!("loading configuration from {path}"))?,
        Err(_) => EngineConfig::load().context("loading configuration")?,
    };
    tracing::info!(workspace_root = %config.workspace_root.display(), "starting engine");

    let responder = Arc::new(
        ScriptedResponder::new("Understood, working on it.")
            .with_response("Draft", "Here is the draft output.")
            .with_response("Review", "The draft looks consistent and complete."),
    );
    let engine = Engine::start(
        config.engine_settings(),
        EngineDeps {
            tasks: Arc::new(InMemoryTaskRepository::new()),
            chats: Arc::new(InMemoryChatRepository::new()),
            workspace: Arc::new(FsWorkspaceStore::new(config.workspace_root.clone())),
            prompts: Arc::new(TemplatePromptGenerator::new()),
            responder,
        },
    )
    .await;

    let plan = vec![
        SubtaskBlueprint::new("Draft", "Write the first draft"),
        SubtaskBlueprint::new("Review", "Review the draft").with_reviewer(Role::User),
    ];
    engine
        .submit(EventPayload::CreateTask {
            name: "Demo pipeline".to_string(),
            config: serde_json::Value::Null,
            plan,
            initial_input: Some("Topic: quarterly results".to_string()),
        })
        .await
        .context("creating demo task")?;

    // Chat creation is fire-and-forget; give the cascade a moment to
    // land before the process exits.
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    tracing::info!("demo pipeline created; inspect the workspace directory for outputs");
    Ok(())
}
