//! Admin API errors and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shipgate_core::gate::GateError;
use shipgate_core::PipelineError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    /// The request is valid but the pipeline's state does not allow it.
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::RunNotFound(_) => ApiError::NotFound(message),
            PipelineError::InvalidTransition { .. }
            | PipelineError::NotCancellable { .. }
            | PipelineError::NotRollbackable { .. }
            | PipelineError::NoPriorSuccess
            | PipelineError::NoCurrentArtifact
            | PipelineError::Busy { .. } => ApiError::Conflict(message),
            PipelineError::Config(_) => ApiError::BadRequest(message),
            PipelineError::RollbackFailed { .. }
            | PipelineError::TaskFailed(_)
            | PipelineError::Storage(_) => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
