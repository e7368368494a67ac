use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use interview_core::error::{PersistenceError, PipelineError, StoreError};
use serde_json::json;

/// Errors surfaced by the HTTP actions, mapped onto 404 / 400 / 500.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Interview not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("Invalid action")]
    InvalidAction(String),
    #[error("{0}")]
    Internal(String),
}

impl ActionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ActionError::NotFound(_) => StatusCode::NOT_FOUND,
            ActionError::Validation(_) | ActionError::InvalidAction(_) => StatusCode::BAD_REQUEST,
            ActionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ActionError::Internal(message) => tracing::error!("Action failed: {}", message),
            ActionError::InvalidAction(action) => tracing::warn!("Invalid action '{}'", action),
            ActionError::NotFound(id) => tracing::debug!(interview_id = %id, "Interview not found"),
            ActionError::Validation(message) => tracing::debug!("Rejected request: {}", message),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<JsonRejection> for ActionError {
    fn from(rejection: JsonRejection) -> Self {
        ActionError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<StoreError> for ActionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => ActionError::NotFound(id),
            StoreError::IndexOutOfRange { .. } | StoreError::AlreadyCompleted(_) => {
                ActionError::Validation(error.to_string())
            }
            other => ActionError::Internal(other.to_string()),
        }
    }
}

impl From<PersistenceError> for ActionError {
    fn from(error: PersistenceError) -> Self {
        match error.source {
            StoreError::Database(_) | StoreError::Migration(_) | StoreError::Corrupt { .. } => {
                ActionError::Internal(error.to_string())
            }
            source => source.into(),
        }
    }
}

impl From<PipelineError> for ActionError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::NotFound(id) => ActionError::NotFound(id),
            PipelineError::NoResponses(_) => ActionError::Validation(error.to_string()),
            PipelineError::Incomplete { ref failures, .. } => {
                let indices: Vec<usize> = failures.iter().map(|f| f.question_index).collect();
                ActionError::Internal(format!(
                    "Failed to generate feedback for questions {:?}: {}",
                    indices, error
                ))
            }
            PipelineError::ResponsesChanged { .. } => {
                ActionError::Internal(format!("{error}; request feedback again"))
            }
            PipelineError::Store(e) => e.into(),
        }
    }
}
