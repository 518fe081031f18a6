//! HTTP error responses.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pulse_core::PulseError;
use serde::Serialize;

/// Body of every error response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_kind: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_kind: error_kind.into(),
            message: message.into(),
        }
    }
}

/// Application error type that can be converted to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Failure reported by the ingestion pipeline or the store.
    Pulse(PulseError),
    /// The request body could not be read as the expected multipart form.
    BadUpload(String),
    /// The request body exceeded the configured upload limit.
    TooLarge(String),
    /// A blocking worker task panicked or was cancelled.
    Internal(String),
}

impl From<PulseError> for ApiError {
    fn from(err: PulseError) -> Self {
        ApiError::Pulse(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::TooLarge(err.body_text())
        } else {
            ApiError::BadUpload(err.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Pulse(err) => {
                let status = if err.is_client_error() {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, err.kind(), err.to_string())
            }
            ApiError::BadUpload(msg) => (StatusCode::BAD_REQUEST, "MalformedInputError", msg),
            ApiError::TooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "PayloadTooLarge", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg),
        };

        if status.is_server_error() {
            tracing::error!(kind, "{}", message);
        } else {
            tracing::warn!(kind, "{}", message);
        }

        (status, Json(ErrorResponse::new(kind, message))).into_response()
    }
}
