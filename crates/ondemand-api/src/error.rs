//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    /// The orchestrator rejected or never accepted the work.
    BadGateway(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "message": message
        }));

        (status, body).into_response()
    }
}

impl From<ondemand_core::Error> for ApiError {
    fn from(err: ondemand_core::Error) -> Self {
        use ondemand_core::Error;
        match err {
            Error::Validation(_) => ApiError::BadRequest(err.to_string()),
            Error::Orchestrator(_) | Error::SubmissionExhausted { .. } => {
                ApiError::BadGateway(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ondemand_config::ConfigError> for ApiError {
    fn from(err: ondemand_config::ConfigError) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}
