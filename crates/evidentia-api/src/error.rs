//! HTTP mapping of pipeline errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

/// Error returned by every handler; rendered as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    Internal(evidentia_core::Error),
    Unauthorized(String),
    NotFound(String),
    BadRequest(String),
}

impl From<evidentia_core::Error> for ApiError {
    fn from(err: evidentia_core::Error) -> Self {
        use evidentia_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::ActivityNotFound(id) => ApiError::NotFound(format!("Activity not found: {id}")),
            Error::ProjectNotFound(id) => ApiError::NotFound(format!("Project not found: {id}")),
            Error::EvidenceNotFound(id) => ApiError::NotFound(format!("Evidence not found: {id}")),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal(err) => {
                error!(error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
