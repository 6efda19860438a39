//! End-to-end pipeline flows driven through the event bus.
//!
//! Chat creation is fire-and-forget, so tests that depend on the chat
//! cascade wait for it with a bounded poll before asserting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_test::assert_ok;
use tokio::sync::Mutex;

use stepwise::adapters::agent::{ScriptedResponder, TemplatePromptGenerator};
use stepwise::adapters::fs::FsWorkspaceStore;
use stepwise::adapters::memory::{InMemoryChatRepository, InMemoryTaskRepository};
use stepwise::domain::errors::DomainResult;
use stepwise::domain::events::{Event, EventKind, EventPayload};
use stepwise::domain::models::{
    Chat, ChatId, Role, SubtaskBlueprint, SubtaskId, SubtaskStatus, Task, TaskId, TaskStatus,
};
use stepwise::domain::ports::{ChatRepository, TaskRepository, WorkspaceStore};
use stepwise::services::{Engine, EngineDeps, EngineSettings, EventHandler};

const ALL_KINDS: &[EventKind] = &[
    EventKind::CreateTask,
    EventKind::StartTask,
    EventKind::StartSubtask,
    EventKind::CompleteSubtask,
    EventKind::ApproveSubtask,
    EventKind::StartChat,
    EventKind::SubmitMessage,
    EventKind::TaskCreated,
    EventKind::TaskFolderCreated,
    EventKind::TaskInitialized,
    EventKind::TaskLoaded,
    EventKind::SubtaskStarted,
    EventKind::SubtaskPaused,
    EventKind::SubtaskUpdated,
    EventKind::SubtaskCompleted,
    EventKind::NextSubtaskTriggered,
    EventKind::ChatCreated,
    EventKind::MessageReceived,
    EventKind::MessageSaved,
    EventKind::ChatUpdated,
    EventKind::AgentResponseGenerated,
    EventKind::WorkApproved,
    EventKind::HandlerFailed,
];

struct Probe {
    events: Arc<Mutex<Vec<Event>>>,
}

#[async_trait]
impl EventHandler for Probe {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn handle(&self, event: &Event) -> DomainResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

struct Harness {
    engine: Engine,
    tasks: Arc<InMemoryTaskRepository>,
    chats: Arc<InMemoryChatRepository>,
    workspace: Arc<FsWorkspaceStore>,
    events: Arc<Mutex<Vec<Event>>>,
    _tmp: TempDir,
}

impl Harness {
    async fn with_responder(responder: ScriptedResponder) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let chats = Arc::new(InMemoryChatRepository::new());
        let workspace = Arc::new(FsWorkspaceStore::new(tmp.path()));

        let engine = Engine::start(
            EngineSettings::default(),
            EngineDeps {
                tasks: tasks.clone(),
                chats: chats.clone(),
                workspace: workspace.clone(),
                prompts: Arc::new(TemplatePromptGenerator::new()),
                responder: Arc::new(responder),
            },
        )
        .await;

        let events = Arc::new(Mutex::new(Vec::new()));
        for kind in ALL_KINDS {
            engine
                .bus()
                .subscribe(
                    *kind,
                    Arc::new(Probe {
                        events: events.clone(),
                    }),
                )
                .await;
        }

        Self {
            engine,
            tasks,
            chats,
            workspace,
            events,
            _tmp: tmp,
        }
    }

    async fn new() -> Self {
        Self::with_responder(ScriptedResponder::new("All done.")).await
    }

    async fn create_task(&self, plan: Vec<SubtaskBlueprint>, initial_input: Option<&str>) -> Task {
        self.engine
            .submit(EventPayload::CreateTask {
                name: "Pipeline".to_string(),
                config: serde_json::Value::Null,
                plan,
                initial_input: initial_input.map(str::to_string),
            })
            .await
            .unwrap();
        self.tasks
            .find_all()
            .await
            .unwrap()
            .pop()
            .expect("task created")
    }

    async fn task(&self, id: TaskId) -> Task {
        self.tasks.find(id).await.unwrap().expect("task exists")
    }

    /// Wait for the subtask's chat to exist, be seeded, and have its
    /// first assistant reply.
    async fn seeded_chat(&self, subtask_id: SubtaskId) -> Chat {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(chat) = self
                    .chats
                    .find_active_by_subtask(subtask_id)
                    .await
                    .unwrap()
                {
                    if chat.messages.len() >= 2 {
                        return chat;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("chat cascade did not settle")
    }

    async fn wait_for(&self, kind: EventKind, at_least: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if self.count(kind).await >= at_least {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never saw {at_least} {kind} event(s)"));
    }

    async fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().await.iter().map(Event::kind).collect()
    }

    async fn count(&self, kind: EventKind) -> usize {
        self.kinds().await.iter().filter(|k| **k == kind).count()
    }
}

fn two_step_plan() -> Vec<SubtaskBlueprint> {
    vec![
        SubtaskBlueprint::new("Draft", "Write the first draft"),
        SubtaskBlueprint::new("Polish", "Polish the draft"),
    ]
}

fn assert_subsequence(kinds: &[EventKind], expected: &[EventKind]) {
    let mut it = kinds.iter();
    for want in expected {
        assert!(
            it.any(|k| k == want),
            "expected {want:?} in order within {kinds:?}"
        );
    }
}

#[tokio::test]
async fn test_create_task_cascades_into_first_step() {
    let h = Harness::new().await;
    let task = h.create_task(two_step_plan(), None).await;

    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.subtasks[0].status, SubtaskStatus::InProgress);
    assert_eq!(task.subtasks[1].status, SubtaskStatus::Pending);
    assert_eq!(task.current_subtask_id, Some(task.subtasks[0].id));
    assert!(task.folder_path.is_some());
    assert!(task.validate().is_ok());

    assert_subsequence(
        &h.kinds().await,
        &[
            EventKind::TaskFolderCreated,
            EventKind::TaskCreated,
            EventKind::TaskInitialized,
            EventKind::TaskLoaded,
            EventKind::SubtaskUpdated,
            EventKind::SubtaskStarted,
        ],
    );

    // The detached chat cascade seeds the chat and answers it once.
    let chat = h.seeded_chat(task.subtasks[0].id).await;
    assert_eq!(chat.messages.len(), 2);
    assert!(chat.messages[0].metadata.is_prompt);
    assert_eq!(chat.messages[1].role, Role::Assistant);
    h.wait_for(EventKind::AgentResponseGenerated, 1).await;

    // Creation events share the command's correlation id; starting
    // the subtask opened a new chain that the chat events continue.
    let events = h.events.lock().await;
    let creation_corr = events[0].correlation_id;
    let subtask_corr = events
        .iter()
        .find(|e| e.kind() == EventKind::SubtaskStarted)
        .unwrap()
        .correlation_id;
    let chat_corr = events
        .iter()
        .find(|e| e.kind() == EventKind::ChatCreated)
        .unwrap()
        .correlation_id;
    for e in events.iter() {
        if matches!(
            e.kind(),
            EventKind::TaskFolderCreated
                | EventKind::TaskCreated
                | EventKind::TaskInitialized
                | EventKind::TaskLoaded
        ) {
            assert_eq!(e.correlation_id, creation_corr);
        }
    }
    assert_ne!(subtask_corr, creation_corr);
    assert_eq!(chat_corr, subtask_corr);
}

#[tokio::test]
async fn test_input_flows_from_initial_then_previous_output() {
    let h = Harness::new().await;
    let task = h.create_task(two_step_plan(), Some("seed data")).await;
    h.seeded_chat(task.subtasks[0].id).await;

    h.engine
        .submit(EventPayload::CompleteSubtask {
            task_id: task.id,
            subtask_id: task.subtasks[0].id,
            output: "alpha out".to_string(),
            requires_approval: false,
        })
        .await
        .unwrap();

    let inputs: Vec<Option<String>> = h
        .events
        .lock()
        .await
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::SubtaskStarted { input, .. } => Some(input.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        inputs,
        vec![
            Some("seed data".to_string()),
            Some("alpha out".to_string())
        ]
    );
}

#[tokio::test]
async fn test_completion_advances_and_closes_chat() {
    let h = Harness::new().await;
    let task = h.create_task(two_step_plan(), None).await;
    let first = task.subtasks[0].id;
    h.seeded_chat(first).await;

    h.engine
        .submit(EventPayload::CompleteSubtask {
            task_id: task.id,
            subtask_id: first,
            output: "done".to_string(),
            requires_approval: false,
        })
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.subtasks[0].status, SubtaskStatus::Completed);
    assert_eq!(task.subtasks[1].status, SubtaskStatus::InProgress);
    assert_eq!(task.current_subtask_id, Some(task.subtasks[1].id));
    assert_eq!(task.status, TaskStatus::InProgress);

    // The completed step's chat is closed; the new step gets its own.
    assert!(h.chats.find_active_by_subtask(first).await.unwrap().is_none());
    h.seeded_chat(task.subtasks[1].id).await;

    assert_eq!(
        h.workspace.read_output(task.id, 0).await.unwrap().as_deref(),
        Some("done")
    );
    assert_subsequence(
        &h.kinds().await,
        &[EventKind::SubtaskCompleted, EventKind::NextSubtaskTriggered],
    );
}

#[tokio::test]
async fn test_last_completion_finishes_task() {
    let h = Harness::new().await;
    let plan = vec![SubtaskBlueprint::new("Only", "the only step")];
    let task = h.create_task(plan, None).await;
    h.seeded_chat(task.subtasks[0].id).await;

    h.engine
        .submit(EventPayload::CompleteSubtask {
            task_id: task.id,
            subtask_id: task.subtasks[0].id,
            output: "final".to_string(),
            requires_approval: false,
        })
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.current_subtask_id, None);
    assert_eq!(h.count(EventKind::SubtaskStarted).await, 1);
}

#[tokio::test]
async fn test_approval_gates_advancement() {
    let h = Harness::new().await;
    let plan = vec![
        SubtaskBlueprint::new("Draft", "Write the draft").with_reviewer(Role::User),
        SubtaskBlueprint::new("Polish", "Polish the draft"),
    ];
    let task = h.create_task(plan, None).await;
    let first = task.subtasks[0].id;
    h.seeded_chat(first).await;

    h.engine
        .submit(EventPayload::CompleteSubtask {
            task_id: task.id,
            subtask_id: first,
            output: "gated work".to_string(),
            requires_approval: true,
        })
        .await
        .unwrap();

    // Completion is recorded, but the pipeline holds.
    let held = h.task(task.id).await;
    assert_eq!(held.subtasks[0].status, SubtaskStatus::Completed);
    assert_eq!(held.subtasks[1].status, SubtaskStatus::Pending);
    assert_eq!(h.count(EventKind::NextSubtaskTriggered).await, 0);

    h.engine
        .submit(EventPayload::ApproveSubtask {
            task_id: task.id,
            subtask_id: first,
        })
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.subtasks[1].status, SubtaskStatus::InProgress);
    assert_eq!(h.count(EventKind::NextSubtaskTriggered).await, 1);
}

#[tokio::test]
async fn test_in_chat_approval_completes_with_assistant_output() {
    let h = Harness::with_responder(ScriptedResponder::new("the deliverable")).await;
    let plan = vec![SubtaskBlueprint::new("Draft", "Write the draft")];
    let task = h.create_task(plan, None).await;
    let chat = h.seeded_chat(task.subtasks[0].id).await;
    h.wait_for(EventKind::AgentResponseGenerated, 1).await;

    h.engine
        .submit(EventPayload::SubmitMessage {
            chat_id: chat.id,
            content: "Looks good. APPROVE".to_string(),
        })
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.subtasks[0].status, SubtaskStatus::Completed);
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(h.count(EventKind::WorkApproved).await, 1);

    // The recorded output is the assistant's latest message, and the
    // approval itself got no assistant reply.
    assert_eq!(
        h.workspace.read_output(task.id, 0).await.unwrap().as_deref(),
        Some("the deliverable")
    );
    assert_eq!(h.count(EventKind::AgentResponseGenerated).await, 1);
}

#[tokio::test]
async fn test_duplicate_start_is_absorbed() {
    let h = Harness::new().await;
    let task = h.create_task(two_step_plan(), None).await;
    let first = task.subtasks[0].id;
    h.seeded_chat(first).await;

    h.engine
        .submit(EventPayload::StartSubtask {
            task_id: task.id,
            subtask_id: first,
        })
        .await
        .unwrap();

    assert_eq!(h.count(EventKind::SubtaskStarted).await, 1);
    assert_eq!(h.count(EventKind::ChatCreated).await, 1);
    let chat = h.seeded_chat(first).await;
    assert_eq!(chat.messages.len(), 2);
}

#[tokio::test]
async fn test_out_of_order_start_pauses_current_step() {
    let h = Harness::new().await;
    let task = h.create_task(two_step_plan(), None).await;
    let first = task.subtasks[0].id;
    let second = task.subtasks[1].id;
    h.seeded_chat(first).await;

    h.engine
        .submit(EventPayload::StartSubtask {
            task_id: task.id,
            subtask_id: second,
        })
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.subtasks[0].status, SubtaskStatus::Pending);
    assert_eq!(task.subtasks[1].status, SubtaskStatus::InProgress);
    assert_eq!(task.current_subtask_id, Some(second));
    assert!(task.validate().is_ok());

    assert_eq!(h.count(EventKind::SubtaskPaused).await, 1);
    assert!(h.chats.find_active_by_subtask(first).await.unwrap().is_none());
    h.seeded_chat(second).await;
}

#[tokio::test]
async fn test_recompletion_is_idempotent() {
    let h = Harness::new().await;
    let task = h.create_task(two_step_plan(), None).await;
    let first = task.subtasks[0].id;
    h.seeded_chat(first).await;

    for output in ["first", "second"] {
        h.engine
            .submit(EventPayload::CompleteSubtask {
                task_id: task.id,
                subtask_id: first,
                output: output.to_string(),
                requires_approval: false,
            })
            .await
            .unwrap();
    }

    // The original output stands; nothing was re-archived.
    assert_eq!(
        h.workspace.read_output(task.id, 0).await.unwrap().as_deref(),
        Some("first")
    );
    assert!(h.workspace.output_history(task.id, 0).await.unwrap().is_empty());
    assert_eq!(h.count(EventKind::SubtaskCompleted).await, 1);

    let task = h.task(task.id).await;
    assert_eq!(task.subtasks[1].status, SubtaskStatus::InProgress);
}

#[tokio::test]
async fn test_recompleting_last_step_is_absorbed() {
    let h = Harness::new().await;
    let plan = vec![SubtaskBlueprint::new("Only", "the only step")];
    let task = h.create_task(plan, None).await;
    let subtask_id = task.subtasks[0].id;
    h.seeded_chat(subtask_id).await;

    // Re-completion and a straggling approval both land after the
    // task has already finished; all of them are absorbed.
    for output in ["final", "again"] {
        h.engine
            .submit(EventPayload::CompleteSubtask {
                task_id: task.id,
                subtask_id,
                output: output.to_string(),
                requires_approval: false,
            })
            .await
            .unwrap();
    }
    h.engine
        .submit(EventPayload::ApproveSubtask {
            task_id: task.id,
            subtask_id,
        })
        .await
        .unwrap();

    let task = h.task(task.id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(h.count(EventKind::SubtaskCompleted).await, 1);
    assert_eq!(h.count(EventKind::HandlerFailed).await, 0);
    assert_eq!(
        h.workspace.read_output(task.id, 0).await.unwrap().as_deref(),
        Some("final")
    );

    // The on-disk record caught up with the finished state.
    let on_disk = h.workspace.load_tasks().await.unwrap();
    assert_eq!(on_disk.len(), 1);
    assert_eq!(on_disk[0].status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_closed_or_unknown_chats_reject_messages() {
    let h = Harness::new().await;
    let plan = vec![SubtaskBlueprint::new("Only", "the only step")];
    let task = h.create_task(plan, None).await;
    let subtask_id = task.subtasks[0].id;
    let chat = h.seeded_chat(subtask_id).await;

    h.engine
        .submit(EventPayload::CompleteSubtask {
            task_id: task.id,
            subtask_id,
            output: "done".to_string(),
            requires_approval: false,
        })
        .await
        .unwrap();

    let err = h
        .engine
        .submit(EventPayload::SubmitMessage {
            chat_id: chat.id,
            content: "too late".to_string(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("closed"));

    assert!(h
        .engine
        .submit(EventPayload::SubmitMessage {
            chat_id: ChatId::new(),
            content: "hello?".to_string(),
        })
        .await
        .is_err());
}

#[tokio::test]
async fn test_chat_updated_tracks_last_saved_message() {
    let h = Harness::new().await;
    let task = h.create_task(two_step_plan(), None).await;
    let chat = h.seeded_chat(task.subtasks[0].id).await;
    h.wait_for(EventKind::MessageSaved, 2).await;

    h.engine
        .submit(EventPayload::SubmitMessage {
            chat_id: chat.id,
            content: "please revise".to_string(),
        })
        .await
        .unwrap();

    let events = h.events.lock().await;
    let saved: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::MessageSaved { message_id, .. } => Some(*message_id),
            _ => None,
        })
        .collect();
    let updated: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ChatUpdated {
                last_message_id, ..
            } => Some(*last_message_id),
            _ => None,
        })
        .collect();
    assert_eq!(saved.len(), 4);
    assert_eq!(saved, updated);
    drop(events);

    let chat = h.chats.find(chat.id).await.unwrap().unwrap();
    assert_eq!(chat.last_message().unwrap().id, *updated.last().unwrap());
}

#[tokio::test]
async fn test_concurrent_messages_keep_chat_updated_consistent() {
    let h = Harness::new().await;
    let task = h.create_task(two_step_plan(), None).await;
    let chat = h.seeded_chat(task.subtasks[0].id).await;
    h.wait_for(EventKind::MessageSaved, 2).await;

    let submissions = [
        h.engine.submit(EventPayload::SubmitMessage {
            chat_id: chat.id,
            content: "tighten the intro".to_string(),
        }),
        h.engine.submit(EventPayload::SubmitMessage {
            chat_id: chat.id,
            content: "expand the summary".to_string(),
        }),
    ];
    for result in futures::future::join_all(submissions).await {
        tokio_test::assert_ok!(result);
    }

    // However the two intakes interleaved, every ChatUpdated must
    // name the message the immediately preceding MessageSaved did.
    let events = h.events.lock().await;
    let mut last_saved = None;
    for e in events.iter() {
        match &e.payload {
            EventPayload::MessageSaved { message_id, .. } => last_saved = Some(*message_id),
            EventPayload::ChatUpdated {
                last_message_id, ..
            } => assert_eq!(Some(*last_message_id), last_saved),
            _ => {}
        }
    }
    drop(events);

    // Seed, first reply, then two user turns each answered once.
    let chat = h.chats.find(chat.id).await.unwrap().unwrap();
    assert_eq!(chat.messages.len(), 6);
}

#[tokio::test]
async fn test_tasks_progress_independently() {
    let h = Harness::new().await;
    let plan = vec![SubtaskBlueprint::new("Only", "the only step")];
    let a = h.create_task(plan.clone(), None).await;
    let b = h.create_task(plan, None).await;
    assert_eq!(a.seq_number, 1);
    assert_eq!(b.seq_number, 2);
    assert_ne!(a.folder_path, b.folder_path);
    h.seeded_chat(a.subtasks[0].id).await;
    h.seeded_chat(b.subtasks[0].id).await;

    let completions = [
        h.engine.submit(EventPayload::CompleteSubtask {
            task_id: a.id,
            subtask_id: a.subtasks[0].id,
            output: "a done".to_string(),
            requires_approval: false,
        }),
        h.engine.submit(EventPayload::CompleteSubtask {
            task_id: b.id,
            subtask_id: b.subtasks[0].id,
            output: "b done".to_string(),
            requires_approval: false,
        }),
    ];
    for result in futures::future::join_all(completions).await {
        tokio_test::assert_ok!(result);
    }

    assert_eq!(h.task(a.id).await.status, TaskStatus::Completed);
    assert_eq!(h.task(b.id).await.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_sequence_numbers_skip_removed_tasks() {
    let h = Harness::new().await;
    let plan = vec![SubtaskBlueprint::new("Only", "the only step")];
    let a = h.create_task(plan.clone(), None).await;
    let b = h.create_task(plan.clone(), None).await;
    h.seeded_chat(a.subtasks[0].id).await;
    h.seeded_chat(b.subtasks[0].id).await;

    h.tasks.remove(a.id).await.unwrap();

    // Numbering continues past the gap instead of reusing the second
    // task's slot (and folder name).
    let c = h.create_task(plan, None).await;
    assert_eq!(c.seq_number, 3);
    assert_ne!(c.folder_path, b.folder_path);
    assert_ne!(c.folder_path, a.folder_path);
}
