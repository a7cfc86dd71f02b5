use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::providers::ProviderError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Configuration(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Signature(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::StateConflict(_) => StatusCode::CONFLICT,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the provider should redeliver a webhook that hit this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Upstream(_) | AppError::Persistence(_) | AppError::Internal(_)
        )
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Duplicate(what) => AppError::StateConflict(format!("duplicate {}", what)),
            RepositoryError::Database(e) => AppError::Persistence(e.to_string()),
            RepositoryError::Corrupt(what) => AppError::Internal(what),
        }
    }
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::MalformedEvent(msg) => AppError::Validation(msg),
            ProviderError::Misconfigured(msg) => AppError::Configuration(msg),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::warn!(error = %self, "Request rejected");
        }

        let body = Json(json!({
            "status": "error",
            "message": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
