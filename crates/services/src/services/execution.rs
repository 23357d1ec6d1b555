use std::{sync::Arc, time::Duration};

use db::{
    DBService,
    models::{
        task::{Task, TaskError},
        task_log::{CreateTaskLogEntry, TaskLogEntry},
    },
};
use executors::{
    CodingAgentRequest, Executable, ExecutorSpawnContext,
    logs::{LineSource, LogLine},
};
use futures::StreamExt;
use tokio::{sync::Notify, task::JoinHandle};
use utils::text::task_branch_name;

use super::{
    config::Config,
    git::GitService,
    notify::NotificationService,
    registry::ProjectRegistry,
};

/// Drives claimed tasks through STARTING → RUNNING → terminal. One
/// supervisor loop per process; the claim query in the Task store is
/// what actually enforces the single RUNNING slot.
#[derive(Clone)]
pub struct ExecutionService {
    inner: Arc<Inner>,
}

struct Inner {
    db: DBService,
    registry: Arc<ProjectRegistry>,
    notifier: NotificationService,
    git: GitService,
    config: Config,
    wake: Notify,
}

impl ExecutionService {
    pub fn new(
        db: DBService,
        registry: Arc<ProjectRegistry>,
        notifier: NotificationService,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                registry,
                notifier,
                git: GitService::new(),
                config,
                wake: Notify::new(),
            }),
        }
    }

    /// Signal the supervisor that new work may be claimable.
    pub fn enqueue(&self) {
        self.inner.wake.notify_one();
    }

    pub fn spawn_supervisor(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                inner.drain().await;
                inner.wake.notified().await;
            }
        })
    }

    /// Claim and fully execute one queued task, if the slot is free.
    /// Returns whether a task was run. The supervisor loops on this;
    /// tests call it directly.
    pub async fn try_run_next(&self) -> bool {
        self.inner.try_run_next().await
    }

    /// Startup reconciliation: finalize tasks a dead supervisor left in
    /// STARTING/RUNNING. Each orphan gets its one terminal notification.
    pub async fn recover_orphans(&self) -> Result<usize, TaskError> {
        let message = "orphaned by supervisor restart";
        let orphans = Task::sweep_orphans(&self.inner.db.pool, message).await?;
        for task in &orphans {
            tracing::warn!(task_id = %task.id, "finalized orphaned task");
            let _ = TaskLogEntry::append(
                &self.inner.db.pool,
                task.id,
                &CreateTaskLogEntry::error(message),
            )
            .await;
            if let Err(e) = self.inner.notifier.errored(task, message).await {
                tracing::warn!(task_id = %task.id, error = %e, "orphan notification failed");
            }
        }
        Ok(orphans.len())
    }
}

impl Inner {
    async fn drain(&self) {
        while self.try_run_next().await {}
    }

    async fn try_run_next(&self) -> bool {
        let claimed = match Task::try_claim_next_queued(&self.db.pool).await {
            Ok(Some(task)) => task,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(error = %e, "failed to claim next queued task");
                return false;
            }
        };

        tracing::info!(task_id = %claimed.id, "task claimed for execution");
        if let Err(failure) = self.execute(&claimed).await {
            self.finalize_error(&claimed, &failure).await;
        }

        let keep = self.config.retention.max_terminal_tasks;
        if let Err(e) = Task::prune_terminal(&self.db.pool, keep).await {
            tracing::warn!(error = %e, "terminal task pruning failed");
        }

        true
    }

    /// STARTING and RUNNING duties. Any Err is a human-readable failure
    /// message; the caller turns it into the terminal ERROR transition.
    async fn execute(&self, task: &Task) -> Result<(), String> {
        // STARTING: repo sync and branch setup.
        let _ = Task::update_progress(&self.db.pool, task.id, "syncing repository", 0).await;
        if let Err(e) = self.notifier.progress(task, "Preparing workspace...").await {
            tracing::warn!(task_id = %task.id, error = %e, "progress notification failed");
        }

        let project_id = task
            .project_id
            .as_deref()
            .ok_or_else(|| "task has no resolved project".to_string())?;
        let project = self
            .registry
            .find_by_id(project_id)
            .ok_or_else(|| format!("project `{project_id}` is no longer registered"))?;

        let branch = task
            .branch
            .clone()
            .unwrap_or_else(|| task_branch_name(&task.id, &task.description));

        let git = self.git.clone();
        let workspace_dir = self.config.execution.resolved_workspace_dir();
        let project_for_sync = project.clone();
        let branch_for_sync = branch.clone();
        let workdir = tokio::task::spawn_blocking(move || {
            git.prepare_task_workspace(&workspace_dir, &project_for_sync, &branch_for_sync)
        })
        .await
        .map_err(|e| format!("workspace preparation aborted: {e}"))?
        .map_err(|e| format!("workspace preparation failed: {e}"))?;

        self.append_log(
            task,
            CreateTaskLogEntry::info(format!("workspace ready on branch {branch}"))
                .with_step("starting"),
        )
        .await;

        // RUNNING: launch the agent and stream its output.
        let request = CodingAgentRequest {
            command: self.config.agent.command.clone(),
            prompt: task.description.clone(),
        };
        let mut child = request
            .spawn(&ExecutorSpawnContext {
                current_dir: &workdir,
                env: None,
            })
            .await
            .map_err(|e| format!("failed to launch agent: {e}"))?;

        if let Err(e) = Task::mark_running(&self.db.pool, task.id).await {
            let _ = child.kill().await;
            return Err(format!("could not enter running state: {e}"));
        }
        let _ = Task::update_progress(&self.db.pool, task.id, "agent running", 1).await;
        if let Err(e) = self.notifier.progress(task, "Agent running...").await {
            tracing::warn!(task_id = %task.id, error = %e, "progress notification failed");
        }

        let timeout = tokio::time::sleep(Duration::from_secs(self.config.agent.timeout_secs));
        tokio::pin!(timeout);
        let mut heartbeat =
            tokio::time::interval(Duration::from_secs(self.config.execution.heartbeat_secs.max(1)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut timed_out = false;
        loop {
            tokio::select! {
                line = child.output().next() => match line {
                    Some(line) => self.append_agent_line(task, line).await,
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = Task::touch_heartbeat(&self.db.pool, task.id).await {
                        tracing::warn!(task_id = %task.id, error = %e, "heartbeat stamp failed");
                    }
                }
                _ = &mut timeout => {
                    timed_out = true;
                    break;
                }
            }
        }
        if timed_out {
            let _ = child.kill().await;
            return Err(format!(
                "agent timed out after {}s",
                self.config.agent.timeout_secs
            ));
        }

        let status = match tokio::time::timeout(Duration::from_secs(30), child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(format!("agent process lost: {e}")),
            Err(_) => {
                let _ = child.kill().await;
                return Err("agent closed its output but never exited".to_string());
            }
        };

        if !status.success() {
            return Err(match status.code() {
                Some(code) => format!("agent exited with status {code}"),
                None => "agent was killed by a signal".to_string(),
            });
        }

        Task::mark_completed(&self.db.pool, task.id)
            .await
            .map_err(|e| format!("could not record completion: {e}"))?;
        self.append_log(task, CreateTaskLogEntry::info("agent completed")).await;

        match Task::find_by_id(&self.db.pool, task.id).await {
            Ok(Some(completed)) => {
                if let Err(e) = self.notifier.completed(&completed).await {
                    tracing::warn!(task_id = %task.id, error = %e, "completion notification failed");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(task_id = %task.id, error = %e, "completed task reload failed"),
        }

        Ok(())
    }

    /// Terminal ERROR path: record, log, and send exactly one message.
    async fn finalize_error(&self, task: &Task, failure: &str) {
        tracing::error!(task_id = %task.id, failure, "task failed");
        if let Err(e) = Task::mark_errored(&self.db.pool, task.id, failure).await {
            tracing::error!(task_id = %task.id, error = %e, "could not record task failure");
            return;
        }
        self.append_log(task, CreateTaskLogEntry::error(failure)).await;
        if let Err(e) = self.notifier.errored(task, failure).await {
            tracing::warn!(task_id = %task.id, error = %e, "error notification failed");
        }
    }

    async fn append_agent_line(&self, task: &Task, line: LogLine) {
        let entry = match line.source {
            LineSource::Stdout => CreateTaskLogEntry::info(line.message),
            LineSource::Stderr => CreateTaskLogEntry::error(line.message),
        };
        self.append_log(task, entry.with_step("running")).await;
    }

    async fn append_log(&self, task: &Task, entry: CreateTaskLogEntry) {
        if let Err(e) = TaskLogEntry::append(&self.db.pool, task.id, &entry).await {
            tracing::warn!(task_id = %task.id, error = %e, "task log append failed");
        }
    }
}
