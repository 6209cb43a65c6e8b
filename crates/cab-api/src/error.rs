use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use cab_agent::SupervisorError;

/// All error responses share the `{error: <message>}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    /// Validation and conflict failures surface as 400, missing resources
    /// as 404.
    pub fn from_supervisor(err: SupervisorError) -> Self {
        match err {
            SupervisorError::NotFound => Self::not_found("Session not found"),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        Self::from_supervisor(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(json!({"error": self.message}))).into_response()
    }
}
