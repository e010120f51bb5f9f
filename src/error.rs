use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
///
/// Every variant is scoped to a single device, sensor or session. None of
/// them is meant to bring the process down.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("Session conflict: {0}")]
    SessionConflict(String),

    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Option is read-only: {0}")]
    ReadOnly(String),

    #[error("Capture start failed [{device}]: {reason}")]
    CaptureStartFailed { device: String, reason: String },

    #[error("Negotiation timed out for viewer {0}")]
    NegotiationTimeout(String),

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Stable machine-readable name of the error category
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::DeviceBusy(_) => "device_busy",
            AppError::SessionConflict(_) => "session_conflict",
            AppError::InvalidConfig(_) => "invalid_config",
            AppError::Unsupported(_) => "unsupported",
            AppError::OutOfRange(_) => "out_of_range",
            AppError::ReadOnly(_) => "read_only",
            AppError::CaptureStartFailed { .. } => "capture_start_failed",
            AppError::NegotiationTimeout(_) => "negotiation_timeout",
            AppError::NegotiationFailed(_) => "negotiation_failed",
            AppError::BadRequest(_) => "bad_request",
            AppError::Hardware(_) => "hardware_error",
            AppError::Config(_) => "config_error",
            AppError::Io(_) => "io_error",
            AppError::Serialization(_) => "serialization_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status the error maps to
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DeviceBusy(_) | AppError::SessionConflict(_) => StatusCode::CONFLICT,
            AppError::InvalidConfig(_)
            | AppError::Unsupported(_)
            | AppError::OutOfRange(_)
            | AppError::ReadOnly(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) | AppError::Serialization(_) => StatusCode::BAD_REQUEST,
            AppError::NegotiationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::NegotiationFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::CaptureStartFailed { .. }
            | AppError::Hardware(_)
            | AppError::Config(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            code: self.code(),
            message: self.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(
                error_code = body.code,
                error_message = %body.message,
                "Request failed"
            );
        } else {
            tracing::debug!(
                error_code = body.code,
                error_message = %body.message,
                "Request rejected"
            );
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::SessionConflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::ReadOnly("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::NegotiationTimeout("v1".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_capture_start_failed_message() {
        let err = AppError::CaptureStartFailed {
            device: "D1".into(),
            reason: "pipeline init".into(),
        };
        assert_eq!(err.code(), "capture_start_failed");
        assert_eq!(err.to_string(), "Capture start failed [D1]: pipeline init");
    }
}
