//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dashsync_engine::Error as EngineError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Engine(e) => engine_error_parts(e),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

fn engine_error_parts(e: &EngineError) -> (StatusCode, String, Option<String>) {
    match e {
        EngineError::UnknownEntityType(_) => (StatusCode::NOT_FOUND, e.to_string(), None),
        EngineError::InvalidRecord(_) => (StatusCode::BAD_REQUEST, e.to_string(), None),
        EngineError::Rejected(reason) => {
            tracing::warn!("Upstream rejected request: {}", reason);
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Upstream rejected the write".to_string(),
                Some(reason.clone()),
            )
        }
        EngineError::Unreachable(_) | EngineError::PartialFetchFailure { .. } => {
            tracing::warn!("Upstream error: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string(), None)
        }
        _ => {
            tracing::error!("Engine error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                Some(e.to_string()),
            )
        }
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
