use axum::{
    Json, Router,
    extract::State,
    response::Json as ResponseJson,
    routing::post,
};
use serde::Deserialize;
use services::services::dispatcher::{ChatRequest, SelectionRequest};
use utils::response::ApiResponse;

use crate::{error::ApiError, state::AppState};

/// A mention event forwarded from the chat platform, reduced to the
/// fields the dispatcher needs.
#[derive(Debug, Deserialize)]
pub struct ChatEventBody {
    pub channel_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub message_id: String,
    pub text: String,
}

/// An interactive selection callback.
#[derive(Debug, Deserialize)]
pub struct InteractionBody {
    pub channel_id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub message_id: String,
    pub chosen_project_id: String,
    pub payload: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat/events", post(post_chat_event))
        .route("/chat/interactions", post(post_chat_interaction))
}

pub async fn post_chat_event(
    State(state): State<AppState>,
    Json(body): Json<ChatEventBody>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state
        .dispatcher
        .handle_chat_message(ChatRequest {
            channel_id: body.channel_id,
            thread_id: body.thread_id,
            message_id: body.message_id,
            text: body.text,
        })
        .await?;
    Ok(Json(ApiResponse::success(())))
}

pub async fn post_chat_interaction(
    State(state): State<AppState>,
    Json(body): Json<InteractionBody>,
) -> Result<ResponseJson<ApiResponse<()>>, ApiError> {
    state
        .dispatcher
        .handle_selection(SelectionRequest {
            channel_id: body.channel_id,
            thread_id: body.thread_id,
            prompt_message_id: body.message_id,
            chosen_project_id: body.chosen_project_id,
            payload: body.payload,
        })
        .await?;
    Ok(Json(ApiResponse::success(())))
}
