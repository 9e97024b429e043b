use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum WebchatError {
    #[error("permission request already pending: {id}")]
    AlreadyPending { id: String },

    #[error("no pending permission request with id: {id}")]
    PermissionNotFound { id: String },

    #[error("request already running: {request_id}")]
    AlreadyRunning { request_id: String },

    #[error("no running request with id: {request_id}")]
    ProcessNotFound { request_id: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("failed to spawn claude: {reason}")]
    Spawn { reason: String },

    #[error("{0}")]
    ClaudeNotFound(String),

    #[error("config error in {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WebchatError>;

impl WebchatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebchatError::PermissionNotFound { .. } | WebchatError::ProcessNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            WebchatError::AlreadyPending { .. } | WebchatError::AlreadyRunning { .. } => {
                StatusCode::CONFLICT
            }
            WebchatError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Every API error is reported as `{ "success": false, "error": "..." }`.
impl IntoResponse for WebchatError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}
