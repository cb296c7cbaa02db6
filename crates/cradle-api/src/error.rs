//! API errors and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cradle_core::CoreError;
use cradle_orchestrator::OrchestratorError;
use thiserror::Error;

use crate::controller::ControllerError;
use crate::handlers::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Controller(_) => StatusCode::BAD_GATEWAY,
            Self::Orchestrator(err) => match err {
                OrchestratorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                OrchestratorError::StageFailed { .. } | OrchestratorError::BuildFailed { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                OrchestratorError::NotFound { .. } => StatusCode::NOT_FOUND,
                OrchestratorError::RuntimeUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                OrchestratorError::DeployFailed { .. }
                | OrchestratorError::LifecycleFailed { .. }
                | OrchestratorError::Workspace(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::warn!(%status, error = %self, "request rejected");
        }
        (status, Json(ApiResponse::<()>::failure(self.to_string()))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
