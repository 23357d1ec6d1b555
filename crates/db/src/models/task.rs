use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("Task not found")]
    NotFound,
    #[error("Illegal status transition to {to} (task is {current})")]
    IllegalTransition { current: TaskStatus, to: TaskStatus },
}

/// Lifecycle states. `Completed` and `Error` are terminal; every
/// transition is guarded by a conditional UPDATE so a row can never
/// regress once terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Type,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Paused,
    Starting,
    Running,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Option<String>,
    pub description: String,
    /// Verbatim request text preserved across the disambiguation round trip.
    pub original_description: Option<String>,
    pub branch: Option<String>,
    pub status: TaskStatus,
    pub progress: Option<String>,
    pub steps_completed: i64,
    pub steps_total: Option<i64>,
    pub error_message: Option<String>,
    pub request_key: Option<String>,
    pub channel_id: Option<String>,
    pub thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateTask {
    pub project_id: Option<String>,
    pub description: String,
    pub original_description: Option<String>,
    pub branch: Option<String>,
    pub status: TaskStatus,
    pub steps_total: Option<i64>,
    pub request_key: Option<String>,
    pub channel_id: Option<String>,
    pub thread_id: Option<String>,
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Queued
    }
}

const SELECT_COLUMNS: &str = r#"SELECT id, project_id, description, original_description, branch,
       status, progress, steps_completed, steps_total, error_message,
       request_key, channel_id, thread_id, created_at, started_at,
       completed_at, updated_at, last_heartbeat_at
  FROM tasks"#;

const RETURNING_COLUMNS: &str = r#"RETURNING id, project_id, description, original_description, branch,
          status, progress, steps_completed, steps_total, error_message,
          request_key, channel_id, thread_id, created_at, started_at,
          completed_at, updated_at, last_heartbeat_at"#;

impl Task {
    /// Insert a new task. The `request_key` unique constraint makes
    /// creation idempotent: a duplicate submission returns the row the
    /// first submission created instead of a second one.
    pub async fn create(pool: &SqlitePool, data: &CreateTask, id: Uuid) -> Result<Self, TaskError> {
        let sql = format!(
            r#"INSERT INTO tasks (id, project_id, description, original_description, branch,
                                  status, steps_total, request_key, channel_id, thread_id)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               {RETURNING_COLUMNS}"#
        );
        let inserted = sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(&data.project_id)
            .bind(&data.description)
            .bind(&data.original_description)
            .bind(&data.branch)
            .bind(data.status)
            .bind(data.steps_total)
            .bind(&data.request_key)
            .bind(&data.channel_id)
            .bind(&data.thread_id)
            .fetch_one(pool)
            .await;

        match inserted {
            Ok(task) => Ok(task),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let key = data.request_key.as_deref().ok_or(TaskError::NotFound)?;
                Self::find_by_request_key(pool, key)
                    .await?
                    .ok_or(TaskError::NotFound)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = $1");
        sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_request_key(
        pool: &SqlitePool,
        request_key: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("{SELECT_COLUMNS} WHERE request_key = $1");
        sqlx::query_as::<_, Task>(&sql)
            .bind(request_key)
            .fetch_optional(pool)
            .await
    }

    /// Newest first.
    pub async fn fetch_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC LIMIT $1");
        sqlx::query_as::<_, Task>(&sql)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    pub async fn count_with_status(
        pool: &SqlitePool,
        status: TaskStatus,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = $1")
            .bind(status)
            .fetch_one(pool)
            .await
    }

    /// Disambiguation continuation: PAUSED -> QUEUED with the chosen
    /// project and the (preserved) description in place.
    pub async fn resume_from_paused(
        pool: &SqlitePool,
        id: Uuid,
        project_id: &str,
        description: &str,
        branch: &str,
    ) -> Result<Self, TaskError> {
        let sql = format!(
            r#"UPDATE tasks
                  SET project_id = $2,
                      description = $3,
                      branch = $4,
                      status = 'queued',
                      updated_at = datetime('now', 'subsec')
                WHERE id = $1 AND status = 'paused'
                {RETURNING_COLUMNS}"#
        );
        let updated = sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .bind(project_id)
            .bind(description)
            .bind(branch)
            .fetch_optional(pool)
            .await?;

        match updated {
            Some(task) => Ok(task),
            None => Err(Self::illegal_transition(pool, id, TaskStatus::Queued).await?),
        }
    }

    /// Claim the oldest QUEUED task for dispatch, refusing while any task
    /// occupies the STARTING/RUNNING slot. This conditional UPDATE is the
    /// single-slot guard: it holds even with a second supervisor process
    /// sharing the store.
    pub async fn try_claim_next_queued(pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!(
            r#"UPDATE tasks
                  SET status = 'starting',
                      started_at = datetime('now', 'subsec'),
                      updated_at = datetime('now', 'subsec')
                WHERE id = (SELECT id FROM tasks
                             WHERE status = 'queued'
                             ORDER BY created_at ASC, rowid ASC
                             LIMIT 1)
                  AND NOT EXISTS (SELECT 1 FROM tasks
                                   WHERE status IN ('starting', 'running'))
                {RETURNING_COLUMNS}"#
        );
        sqlx::query_as::<_, Task>(&sql).fetch_optional(pool).await
    }

    /// STARTING -> RUNNING once the agent subprocess is up.
    pub async fn mark_running(pool: &SqlitePool, id: Uuid) -> Result<(), TaskError> {
        let result = sqlx::query(
            r#"UPDATE tasks
                  SET status = 'running',
                      last_heartbeat_at = datetime('now', 'subsec'),
                      updated_at = datetime('now', 'subsec')
                WHERE id = $1
                  AND status = 'starting'
                  AND NOT EXISTS (SELECT 1 FROM tasks
                                   WHERE status = 'running' AND id != $1)"#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::illegal_transition(pool, id, TaskStatus::Running).await?);
        }
        Ok(())
    }

    /// RUNNING -> COMPLETED.
    pub async fn mark_completed(pool: &SqlitePool, id: Uuid) -> Result<(), TaskError> {
        let result = sqlx::query(
            r#"UPDATE tasks
                  SET status = 'completed',
                      progress = NULL,
                      completed_at = datetime('now', 'subsec'),
                      updated_at = datetime('now', 'subsec')
                WHERE id = $1 AND status = 'running'"#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::illegal_transition(pool, id, TaskStatus::Completed).await?);
        }
        Ok(())
    }

    /// QUEUED/STARTING/RUNNING -> ERROR with the captured failure message.
    pub async fn mark_errored(
        pool: &SqlitePool,
        id: Uuid,
        message: &str,
    ) -> Result<(), TaskError> {
        let result = sqlx::query(
            r#"UPDATE tasks
                  SET status = 'error',
                      error_message = $2,
                      completed_at = datetime('now', 'subsec'),
                      updated_at = datetime('now', 'subsec')
                WHERE id = $1 AND status IN ('queued', 'starting', 'running')"#,
        )
        .bind(id)
        .bind(message)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::illegal_transition(pool, id, TaskStatus::Error).await?);
        }
        Ok(())
    }

    /// Best-effort cancellation, legal only before dispatch begins.
    /// Returns false when the task already left QUEUED.
    pub async fn cancel_queued(
        pool: &SqlitePool,
        id: Uuid,
        message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE tasks
                  SET status = 'error',
                      error_message = $2,
                      completed_at = datetime('now', 'subsec'),
                      updated_at = datetime('now', 'subsec')
                WHERE id = $1 AND status = 'queued'"#,
        )
        .bind(id)
        .bind(message)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Advance the progress marker. Terminal rows are left untouched.
    pub async fn update_progress(
        pool: &SqlitePool,
        id: Uuid,
        progress: &str,
        steps_completed: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE tasks
                  SET progress = $2,
                      steps_completed = $3,
                      updated_at = datetime('now', 'subsec')
                WHERE id = $1 AND status IN ('starting', 'running')"#,
        )
        .bind(id)
        .bind(progress)
        .bind(steps_completed)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Liveness stamp for a RUNNING task, for operator visibility.
    pub async fn touch_heartbeat(pool: &SqlitePool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE tasks
                  SET last_heartbeat_at = datetime('now', 'subsec')
                WHERE id = $1 AND status = 'running'"#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Startup reconciliation: tasks left in STARTING/RUNNING by a dead
    /// supervisor are finalized as ERROR. Returns the orphaned rows.
    pub async fn sweep_orphans(pool: &SqlitePool, message: &str) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            r#"UPDATE tasks
                  SET status = 'error',
                      error_message = $1,
                      completed_at = datetime('now', 'subsec'),
                      updated_at = datetime('now', 'subsec')
                WHERE status IN ('starting', 'running')
                {RETURNING_COLUMNS}"#
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(message)
            .fetch_all(pool)
            .await
    }

    /// Rolling retention: delete the oldest terminal tasks beyond `keep`,
    /// their log lines first. Non-terminal rows are never pruned.
    pub async fn prune_terminal(pool: &SqlitePool, keep: i64) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let stale_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"SELECT id FROM tasks
                WHERE status IN ('completed', 'error')
                ORDER BY completed_at DESC, id DESC
                LIMIT -1 OFFSET $1"#,
        )
        .bind(keep)
        .fetch_all(&mut *tx)
        .await?;

        let mut pruned = 0;
        for id in &stale_ids {
            sqlx::query("DELETE FROM task_logs WHERE task_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            pruned += sqlx::query("DELETE FROM tasks WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        if pruned > 0 {
            tracing::debug!(pruned, "dropped oldest terminal tasks");
        }
        Ok(pruned)
    }

    async fn illegal_transition(
        pool: &SqlitePool,
        id: Uuid,
        to: TaskStatus,
    ) -> Result<TaskError, sqlx::Error> {
        match Self::find_by_id(pool, id).await? {
            Some(task) => Ok(TaskError::IllegalTransition {
                current: task.status,
                to,
            }),
            None => Ok(TaskError::NotFound),
        }
    }
}
