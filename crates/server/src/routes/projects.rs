use axum::{Json, Router, extract::State, response::Json as ResponseJson, routing::get};
use services::services::registry::Project;
use utils::response::ApiResponse;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/projects", get(get_projects))
}

pub async fn get_projects(
    State(state): State<AppState>,
) -> ResponseJson<ApiResponse<Vec<Project>>> {
    let projects = state.registry.snapshot().to_vec();
    Json(ApiResponse::success(projects))
}
