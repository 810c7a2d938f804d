//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coordinator::CoordinatorError;
use txlog::TxLogError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Coordinator error.
    Coordinator(CoordinatorError),
    /// Transaction log error.
    TxLog(TxLogError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Coordinator(err) => coordinator_error_to_response(err),
            ApiError::TxLog(err) => {
                tracing::error!(error = %err, "transaction log error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn coordinator_error_to_response(err: CoordinatorError) -> (StatusCode, String) {
    match &err {
        CoordinatorError::UnknownGlobalTx(_) => (StatusCode::NOT_FOUND, err.to_string()),
        CoordinatorError::TerminalState { .. } => (StatusCode::CONFLICT, err.to_string()),
        CoordinatorError::InvalidEvent(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        CoordinatorError::NoCallbackAvailable { .. } | CoordinatorError::ChannelClosed { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        ApiError::Coordinator(err)
    }
}

impl From<TxLogError> for ApiError {
    fn from(err: TxLogError) -> Self {
        ApiError::TxLog(err)
    }
}
