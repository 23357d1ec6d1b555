use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::Json as ResponseJson,
    routing::post,
};
use serde::{Deserialize, Serialize};
use services::services::dispatcher::TriggerRequest;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerBody {
    #[serde(default)]
    pub task_id: Option<String>,
    pub repo_url: String,
    #[serde(default)]
    pub repo_branch: Option<String>,
    #[serde(default)]
    pub work_item_path: Option<String>,
    #[serde(default)]
    pub sub_step_count: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAccepted {
    pub status: &'static str,
    pub task_id: Uuid,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/trigger", post(post_trigger))
}

pub async fn post_trigger(
    State(state): State<AppState>,
    Json(body): Json<TriggerBody>,
) -> Result<(StatusCode, ResponseJson<TriggerAccepted>), ApiError> {
    if body.repo_url.trim().is_empty() {
        return Err(ApiError::BadRequest("repoUrl must not be empty".to_string()));
    }
    if let Some(count) = body.sub_step_count
        && count < 0
    {
        return Err(ApiError::BadRequest(
            "subStepCount must not be negative".to_string(),
        ));
    }

    let task = state
        .dispatcher
        .handle_trigger(TriggerRequest {
            task_id: body.task_id,
            repo_url: body.repo_url,
            repo_branch: body.repo_branch,
            work_item_path: body.work_item_path,
            sub_step_count: body.sub_step_count,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerAccepted {
            status: "accepted",
            task_id: task.id,
        }),
    ))
}
