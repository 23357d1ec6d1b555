use std::sync::Arc;

use db::{
    DBService,
    models::{
        task::{CreateTask, Task, TaskError, TaskStatus},
        task_log::TaskLogEntry,
    },
};
use thiserror::Error;
use utils::text::task_branch_name;
use uuid::Uuid;

use super::{
    command::{ChatCommand, CommandParse, parse_command},
    execution::ExecutionService,
    notify::{NotificationService, NotifyError, PendingSelection},
    registry::{Project, ProjectRegistry},
    resolver::{Resolution, resolve},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("No registered project uses repository {0}")]
    UnknownRepo(String),
    #[error("Invalid selection payload: {0}")]
    InvalidPayload(String),
}

/// A normalized inbound chat message.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub channel_id: String,
    pub thread_id: Option<String>,
    /// Platform id of the triggering message; the idempotency token is
    /// derived from it.
    pub message_id: String,
    pub text: String,
}

/// The interactive callback completing a disambiguation round trip.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub channel_id: String,
    pub thread_id: Option<String>,
    /// Id of the prompt message, so it can be replaced in place.
    pub prompt_message_id: String,
    pub chosen_project_id: String,
    /// Opaque payload round-tripped through the prompt option.
    pub payload: String,
}

/// `POST /trigger` webhook body, already deserialized.
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub task_id: Option<String>,
    pub repo_url: String,
    pub repo_branch: Option<String>,
    pub work_item_path: Option<String>,
    pub sub_step_count: Option<i64>,
}

/// Front door for every request shape. Resolves projects, creates task
/// rows, acknowledges requesters, and pokes the execution supervisor.
#[derive(Clone)]
pub struct Dispatcher {
    db: DBService,
    registry: Arc<ProjectRegistry>,
    notifier: NotificationService,
    execution: ExecutionService,
}

impl Dispatcher {
    pub fn new(
        db: DBService,
        registry: Arc<ProjectRegistry>,
        notifier: NotificationService,
        execution: ExecutionService,
    ) -> Self {
        Self {
            db,
            registry,
            notifier,
            execution,
        }
    }

    pub async fn handle_chat_message(&self, request: ChatRequest) -> Result<(), DispatchError> {
        match parse_command(&request.text) {
            CommandParse::Ok(ChatCommand::Task {
                project_identifier,
                description,
            }) => {
                self.dispatch_direct(&project_identifier, &description, &request)
                    .await
            }
            CommandParse::Ok(ChatCommand::ListProjects) => {
                let text = render_project_list(&self.registry.snapshot());
                self.reply(&request, text).await
            }
            CommandParse::Ok(ChatCommand::RecentLogs { count }) => {
                let entries = TaskLogEntry::fetch_recent(&self.db.pool, count).await?;
                self.reply(&request, render_recent_logs(&entries)).await
            }
            CommandParse::Ok(ChatCommand::Cancel { task_id }) => {
                self.cancel(task_id, &request).await
            }
            CommandParse::Ok(ChatCommand::Status) => {
                let text = self.render_status().await?;
                self.reply(&request, text).await
            }
            CommandParse::Ok(ChatCommand::Help) => self.reply(&request, help_text()).await,
            CommandParse::MissingArgument { usage, .. } => {
                self.reply(&request, format!("*Usage:* `{usage}`")).await
            }
            CommandParse::Unknown { keyword } => {
                self.reply(
                    &request,
                    format!("Unknown command `{keyword}`.\n\n{}", help_text()),
                )
                .await
            }
        }
    }

    /// Direct request: identifier and description in one message.
    async fn dispatch_direct(
        &self,
        identifier: &str,
        description: &str,
        request: &ChatRequest,
    ) -> Result<(), DispatchError> {
        let snapshot = self.registry.snapshot();
        let request_key = format!("msg:{}:{}", request.channel_id, request.message_id);

        match resolve(identifier, description, &snapshot) {
            Resolution::Resolved(project) => {
                let id = Uuid::new_v4();
                let task = Task::create(
                    &self.db.pool,
                    &CreateTask {
                        project_id: Some(project.id.clone()),
                        description: description.to_string(),
                        branch: Some(task_branch_name(&id, description)),
                        status: TaskStatus::Queued,
                        request_key: Some(request_key),
                        channel_id: Some(request.channel_id.clone()),
                        thread_id: request.thread_id.clone(),
                        ..CreateTask::default()
                    },
                    id,
                )
                .await?;
                self.notifier.acknowledged(&task).await?;
                self.execution.enqueue();
                Ok(())
            }
            Resolution::Ambiguous {
                candidates,
                original_text,
                suggestion,
            } => {
                // PAUSED until the requester picks a project; the prompt
                // payload carries everything needed to resume.
                let task = Task::create(
                    &self.db.pool,
                    &CreateTask {
                        project_id: None,
                        description: original_text.clone(),
                        original_description: Some(original_text),
                        status: TaskStatus::Paused,
                        request_key: Some(request_key),
                        channel_id: Some(request.channel_id.clone()),
                        thread_id: request.thread_id.clone(),
                        ..CreateTask::default()
                    },
                    Uuid::new_v4(),
                )
                .await?;
                self.notifier
                    .disambiguation_prompt(&task, identifier, &candidates, suggestion.as_deref())
                    .await?;
                Ok(())
            }
        }
    }

    /// Selection continuation after an `Ambiguous` response.
    pub async fn handle_selection(&self, request: SelectionRequest) -> Result<(), DispatchError> {
        let pending = PendingSelection::decode(&request.payload)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;

        let snapshot = self.registry.snapshot();
        let resolution = resolve(
            &request.chosen_project_id,
            &pending.original_description,
            &snapshot,
        );
        let Resolution::Resolved(project) = resolution else {
            // The chosen project vanished between prompt and click.
            self.notifier
                .plain(
                    &request.channel_id,
                    request.thread_id.as_deref(),
                    format!(
                        "❌ Project `{}` is no longer registered. Use `list projects` to see current options.",
                        request.chosen_project_id
                    ),
                )
                .await?;
            return Ok(());
        };

        // The continuation supplies no new description: reuse the one
        // preserved at the PAUSED transition, verbatim.
        let description = pending.original_description.clone();
        let branch = task_branch_name(&pending.task_id, &description);
        let task = Task::resume_from_paused(
            &self.db.pool,
            pending.task_id,
            &project.id,
            &description,
            &branch,
        )
        .await?;

        self.notifier
            .confirm_selection(&task, &request.prompt_message_id, &project)
            .await?;
        self.notifier.acknowledged(&task).await?;
        self.execution.enqueue();
        Ok(())
    }

    /// Webhook trigger: the repository URL stands in for the project
    /// identifier.
    pub async fn handle_trigger(&self, request: TriggerRequest) -> Result<Task, DispatchError> {
        let project = self
            .registry
            .find_by_repo_url(&request.repo_url)
            .ok_or_else(|| DispatchError::UnknownRepo(request.repo_url.clone()))?;

        let work_item = request
            .work_item_path
            .clone()
            .or_else(|| project.work_item_path.clone());
        let description = match work_item {
            Some(path) => format!("Execute the work item at {path}"),
            None => format!("Execute the next work item for {}", project.name),
        };

        let id = Uuid::new_v4();
        let branch = request
            .repo_branch
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| task_branch_name(&id, &description));

        let task = Task::create(
            &self.db.pool,
            &CreateTask {
                project_id: Some(project.id.clone()),
                description,
                branch: Some(branch),
                status: TaskStatus::Queued,
                steps_total: request.sub_step_count,
                request_key: request.task_id.as_ref().map(|t| format!("trigger:{t}")),
                ..CreateTask::default()
            },
            id,
        )
        .await?;
        self.execution.enqueue();
        Ok(task)
    }

    /// Best-effort cancel of a QUEUED task; RUNNING tasks have no
    /// cancellation path.
    async fn cancel(&self, task_id: Uuid, request: &ChatRequest) -> Result<(), DispatchError> {
        let Some(task) = Task::find_by_id(&self.db.pool, task_id).await? else {
            return self
                .reply(request, format!("No task `{task_id}` on record."))
                .await;
        };

        let message = "cancelled by requester before dispatch";
        if Task::cancel_queued(&self.db.pool, task_id, message).await? {
            // The one terminal message for this ERROR.
            return self
                .reply(request, format!("🛑 Task `{task_id}` cancelled before dispatch."))
                .await;
        }

        let text = match task.status {
            TaskStatus::Starting | TaskStatus::Running => format!(
                "⚠️ Task `{task_id}` is already executing and cannot be cancelled; it will run to completion or failure."
            ),
            TaskStatus::Paused => format!(
                "Task `{task_id}` is waiting for a project selection; answer or ignore the prompt instead."
            ),
            _ => format!("Task `{task_id}` already finished."),
        };
        self.reply(request, text).await
    }

    async fn reply(&self, request: &ChatRequest, text: String) -> Result<(), DispatchError> {
        self.notifier
            .plain(&request.channel_id, request.thread_id.as_deref(), text)
            .await?;
        Ok(())
    }

    async fn render_status(&self) -> Result<String, DispatchError> {
        let running = Task::count_with_status(&self.db.pool, TaskStatus::Running).await?;
        let queued = Task::count_with_status(&self.db.pool, TaskStatus::Queued).await?;
        let recent = Task::fetch_recent(&self.db.pool, 5).await?;

        let mut lines = vec![format!("*Status:* {running} running, {queued} queued")];
        for task in recent {
            lines.push(format!(
                "• `{}` [{}] {}",
                task.id,
                task.status,
                truncate(&task.description, 60)
            ));
        }
        Ok(lines.join("\n"))
    }
}

fn render_project_list(projects: &[Project]) -> String {
    if projects.is_empty() {
        return "No active projects configured.".to_string();
    }
    let mut lines = vec!["*Available Projects:*".to_string()];
    for p in projects {
        let stack = p.stack.as_deref().unwrap_or("unknown");
        lines.push(format!("• `{}` - {} ({}) [P{}]", p.id, p.name, stack, p.priority));
    }
    lines.join("\n")
}

fn render_recent_logs(entries: &[TaskLogEntry]) -> String {
    if entries.is_empty() {
        return "No recent log entries.".to_string();
    }
    let body: Vec<String> = entries
        .iter()
        .map(|e| format!("[{}] {}", e.level, e.message))
        .collect();
    format!("```\n{}\n```", body.join("\n"))
}

fn help_text() -> String {
    [
        "*Commands:*",
        "• `task <project> <description>` - dispatch a development task",
        "• `list projects` - show registered projects",
        "• `recent logs [n]` - show the last n log lines",
        "• `cancel <task-id>` - cancel a queued task",
        "• `status` - running/queued overview",
    ]
    .join("\n")
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use db::models::task::TaskStatus;
    use tempfile::TempDir;

    use super::*;
    use crate::services::{config::Config, notify::testing::RecordingTransport};

    struct Fixture {
        _dir: TempDir,
        db: DBService,
        dispatcher: Dispatcher,
        transport: Arc<RecordingTransport>,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();

        let registry_path = dir.path().join("projects.json");
        std::fs::write(
            &registry_path,
            serde_json::json!({
                "projects": [
                    {"id": "inhhale-v2", "name": "Inhhale", "repo_url": "https://example.com/inhhale.git", "priority": 1, "stack": "rust"},
                    {"id": "zephyr", "name": "Zephyr", "repo_url": "https://example.com/zephyr.git", "priority": 2}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let registry = Arc::new(ProjectRegistry::load(&registry_path).unwrap());

        let db = DBService::from_url(&format!(
            "sqlite://{}",
            dir.path().join("test.sqlite").to_string_lossy()
        ))
        .await
        .unwrap();

        let transport = Arc::new(RecordingTransport::default());
        let notifier = NotificationService::new(transport.clone());
        let execution = ExecutionService::new(
            db.clone(),
            registry.clone(),
            notifier.clone(),
            Config::default(),
        );
        let dispatcher = Dispatcher::new(db.clone(), registry, notifier, execution);

        Fixture {
            _dir: dir,
            db,
            dispatcher,
            transport,
        }
    }

    fn chat(text: &str, message_id: &str) -> ChatRequest {
        ChatRequest {
            channel_id: "C123".to_string(),
            thread_id: Some("171234.000100".to_string()),
            message_id: message_id.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn direct_request_creates_queued_task_and_acknowledges() {
        let fx = fixture().await;

        fx.dispatcher
            .handle_chat_message(chat("task INHHALE-V2 fix the login bug", "1"))
            .await
            .unwrap();

        let tasks = Task::fetch_recent(&fx.db.pool, 10).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::Queued);
        assert_eq!(tasks[0].project_id.as_deref(), Some("inhhale-v2"));
        assert_eq!(tasks[0].description, "fix the login bug");
        assert!(tasks[0].branch.as_deref().unwrap().starts_with("task/fix-the-login-bug"));

        let posted = fx.transport.posted.lock().unwrap();
        assert!(posted[0].text.contains("queued"));
    }

    #[tokio::test]
    async fn double_submit_is_idempotent() {
        let fx = fixture().await;

        fx.dispatcher
            .handle_chat_message(chat("task inhhale-v2 fix the login bug", "1"))
            .await
            .unwrap();
        fx.dispatcher
            .handle_chat_message(chat("task inhhale-v2 fix the login bug", "1"))
            .await
            .unwrap();

        assert_eq!(Task::fetch_recent(&fx.db.pool, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_project_pauses_task_and_prompts() {
        let fx = fixture().await;

        fx.dispatcher
            .handle_chat_message(chat("task wrongname fix the bug", "1"))
            .await
            .unwrap();

        let tasks = Task::fetch_recent(&fx.db.pool, 10).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Paused);
        assert!(tasks[0].project_id.is_none());
        assert_eq!(tasks[0].original_description.as_deref(), Some("fix the bug"));

        let posted = fx.transport.posted.lock().unwrap();
        assert!(posted[0].text.contains("Unknown project"));
        // The full active list, ordered by priority.
        assert_eq!(posted[0].options.len(), 2);
        let first = PendingSelection::decode(&posted[0].options[0].value).unwrap();
        assert_eq!(first.project_id, "inhhale-v2");
        assert_eq!(first.original_description, "fix the bug");
    }

    #[tokio::test]
    async fn selection_resumes_with_preserved_description() {
        let fx = fixture().await;
        fx.dispatcher
            .handle_chat_message(chat("task wrongname fix the bug", "1"))
            .await
            .unwrap();

        let (payload, prompt_id) = {
            let posted = fx.transport.posted.lock().unwrap();
            (posted[0].options[1].value.clone(), "msg-1".to_string())
        };

        fx.dispatcher
            .handle_selection(SelectionRequest {
                channel_id: "C123".to_string(),
                thread_id: Some("171234.000100".to_string()),
                prompt_message_id: prompt_id,
                chosen_project_id: "zephyr".to_string(),
                payload,
            })
            .await
            .unwrap();

        let tasks = Task::fetch_recent(&fx.db.pool, 10).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Queued);
        assert_eq!(tasks[0].project_id.as_deref(), Some("zephyr"));
        assert_eq!(tasks[0].description, "fix the bug");

        // The prompt was replaced in place, not appended to.
        let updated = fx.transport.updated.lock().unwrap();
        assert_eq!(updated.len(), 1);
        assert!(updated[0].1.text.contains("Project selected"));
    }

    #[tokio::test]
    async fn malformed_selection_payload_is_rejected() {
        let fx = fixture().await;

        let err = fx
            .dispatcher
            .handle_selection(SelectionRequest {
                channel_id: "C123".to_string(),
                thread_id: None,
                prompt_message_id: "msg-1".to_string(),
                chosen_project_id: "zephyr".to_string(),
                payload: "{not json".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn trigger_maps_repo_url_to_project() {
        let fx = fixture().await;

        let task = fx
            .dispatcher
            .handle_trigger(TriggerRequest {
                task_id: Some("wi-42".to_string()),
                repo_url: "https://example.com/zephyr".to_string(),
                repo_branch: Some("feature/wi-42".to_string()),
                work_item_path: Some("work/items/42.md".to_string()),
                sub_step_count: Some(4),
            })
            .await
            .unwrap();

        assert_eq!(task.project_id.as_deref(), Some("zephyr"));
        assert_eq!(task.branch.as_deref(), Some("feature/wi-42"));
        assert_eq!(task.steps_total, Some(4));
        assert!(task.description.contains("work/items/42.md"));

        // Same taskId again: no second row.
        fx.dispatcher
            .handle_trigger(TriggerRequest {
                task_id: Some("wi-42".to_string()),
                repo_url: "https://example.com/zephyr".to_string(),
                repo_branch: None,
                work_item_path: None,
                sub_step_count: None,
            })
            .await
            .unwrap();
        assert_eq!(Task::fetch_recent(&fx.db.pool, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn trigger_with_unknown_repo_is_rejected() {
        let fx = fixture().await;

        let err = fx
            .dispatcher
            .handle_trigger(TriggerRequest {
                task_id: None,
                repo_url: "https://example.com/stranger.git".to_string(),
                repo_branch: None,
                work_item_path: None,
                sub_step_count: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::UnknownRepo(_)));
    }

    #[tokio::test]
    async fn cancel_only_reaches_queued_tasks() {
        let fx = fixture().await;
        fx.dispatcher
            .handle_chat_message(chat("task inhhale-v2 fix the bug", "1"))
            .await
            .unwrap();
        let tasks = Task::fetch_recent(&fx.db.pool, 1).await.unwrap();
        let task = &tasks[0];

        fx.dispatcher
            .handle_chat_message(chat(&format!("cancel {}", task.id), "2"))
            .await
            .unwrap();
        let cancelled = Task::find_by_id(&fx.db.pool, task.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TaskStatus::Error);

        // A terminal task cannot be cancelled again.
        fx.dispatcher
            .handle_chat_message(chat(&format!("cancel {}", task.id), "3"))
            .await
            .unwrap();
        let posted = fx.transport.posted.lock().unwrap();
        assert!(posted.last().unwrap().text.contains("already finished"));
    }
}
