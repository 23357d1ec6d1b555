use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use db::models::task::TaskError;
use services::services::dispatcher::DispatchError;
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    BadRequest(String),
    #[error("Not found")]
    NotFound,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Task(TaskError::NotFound) | ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Task(TaskError::IllegalTransition { .. })
            | ApiError::Dispatch(DispatchError::Task(TaskError::IllegalTransition { .. })) => {
                StatusCode::CONFLICT
            }
            ApiError::Dispatch(DispatchError::UnknownRepo(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Dispatch(DispatchError::InvalidPayload(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Dispatch(DispatchError::Task(TaskError::NotFound)) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body: ApiResponse<()> = ApiResponse::error(self.to_string());
        (status, Json(body)).into_response()
    }
}
