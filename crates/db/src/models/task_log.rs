use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use uuid::Uuid;

/// Severity of a single log line.
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
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Append-only log line belonging to one task. The autoincrement id is
/// the insertion order, so reading back by id reconstructs the exact
/// sequence the agent produced.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub id: i64,
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub step: Option<String>,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateTaskLogEntry {
    pub level: LogLevel,
    pub message: String,
    pub step: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl CreateTaskLogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Info,
            message: message.into(),
            step: None,
            metadata: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: LogLevel::Error,
            message: message.into(),
            step: None,
            metadata: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }
}

impl TaskLogEntry {
    pub async fn append(
        pool: &SqlitePool,
        task_id: Uuid,
        entry: &CreateTaskLogEntry,
    ) -> Result<Self, sqlx::Error> {
        let metadata = entry.metadata.as_ref().map(|m| m.to_string());
        sqlx::query_as::<_, TaskLogEntry>(
            r#"INSERT INTO task_logs (task_id, level, message, step, metadata)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, task_id, created_at, level, message, step, metadata"#,
        )
        .bind(task_id)
        .bind(entry.level)
        .bind(&entry.message)
        .bind(&entry.step)
        .bind(metadata)
        .fetch_one(pool)
        .await
    }

    /// All lines for one task in insertion order.
    pub async fn list_for_task(
        pool: &SqlitePool,
        task_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, TaskLogEntry>(
            r#"SELECT id, task_id, created_at, level, message, step, metadata
                 FROM task_logs
                WHERE task_id = $1
                ORDER BY id ASC"#,
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
    }

    /// The last `n` lines across all tasks, oldest of them first.
    pub async fn fetch_recent(pool: &SqlitePool, n: i64) -> Result<Vec<Self>, sqlx::Error> {
        let mut entries = sqlx::query_as::<_, TaskLogEntry>(
            r#"SELECT id, task_id, created_at, level, message, step, metadata
                 FROM task_logs
                ORDER BY id DESC
                LIMIT $1"#,
        )
        .bind(n)
        .fetch_all(pool)
        .await?;
        entries.reverse();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use sqlx::{
        Pool, Sqlite,
        sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    };

    use super::*;
    use crate::models::task::{CreateTask, Task, TaskStatus};

    async fn setup_pool() -> Pool<Sqlite> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn seed_task(pool: &Pool<Sqlite>) -> Task {
        Task::create(
            pool,
            &CreateTask {
                project_id: Some("demo".to_string()),
                description: "add dark mode".to_string(),
                status: TaskStatus::Queued,
                ..CreateTask::default()
            },
            Uuid::new_v4(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn readback_preserves_insertion_order() {
        let pool = setup_pool().await;
        let task = seed_task(&pool).await;

        for i in 0..20 {
            TaskLogEntry::append(&pool, task.id, &CreateTaskLogEntry::info(format!("line {i}")))
                .await
                .unwrap();
        }

        let entries = TaskLogEntry::list_for_task(&pool, task.id).await.unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        let expected: Vec<String> = (0..20).map(|i| format!("line {i}")).collect();

        assert_eq!(messages, expected);
    }

    #[tokio::test]
    async fn recent_logs_span_tasks_in_order() {
        let pool = setup_pool().await;
        let a = seed_task(&pool).await;
        let b = seed_task(&pool).await;

        TaskLogEntry::append(&pool, a.id, &CreateTaskLogEntry::info("first"))
            .await
            .unwrap();
        TaskLogEntry::append(&pool, b.id, &CreateTaskLogEntry::error("second"))
            .await
            .unwrap();
        TaskLogEntry::append(&pool, a.id, &CreateTaskLogEntry::info("third"))
            .await
            .unwrap();

        let recent = TaskLogEntry::fetch_recent(&pool, 2).await.unwrap();
        let messages: Vec<_> = recent.iter().map(|e| e.message.as_str()).collect();

        assert_eq!(messages, vec!["second", "third"]);
        assert_eq!(recent[0].level, LogLevel::Error);
    }
}
