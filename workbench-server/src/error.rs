//! Maps workbench errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::warn;
use workbench::WorkbenchError;

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<WorkbenchError> for ApiError {
    fn from(err: WorkbenchError) -> Self {
        let status = match &err {
            WorkbenchError::PathEscape { .. } => StatusCode::BAD_REQUEST,
            WorkbenchError::NotFound { .. } => StatusCode::NOT_FOUND,
            WorkbenchError::UnsupportedKind { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            WorkbenchError::RemoteCreate { .. } => StatusCode::BAD_GATEWAY,
            WorkbenchError::Io { .. }
            | WorkbenchError::Spawn { .. }
            | WorkbenchError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = self.status.as_u16(), error = %self.message, "request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
