use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::{task::Task, task_log::TaskLogEntry};
use serde::Deserialize;
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct TaskListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tasks", get(get_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/logs", get(get_task_logs))
}

pub async fn get_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<ResponseJson<ApiResponse<Vec<Task>>>, ApiError> {
    let tasks = Task::fetch_recent(&state.db.pool, query.limit.clamp(1, 500)).await?;
    Ok(Json(ApiResponse::success(tasks)))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = Task::find_by_id(&state.db.pool, id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(ApiResponse::success(task)))
}

pub async fn get_task_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<TaskLogEntry>>>, ApiError> {
    Task::find_by_id(&state.db.pool, id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let logs = TaskLogEntry::list_for_task(&state.db.pool, id).await?;
    Ok(Json(ApiResponse::success(logs)))
}
