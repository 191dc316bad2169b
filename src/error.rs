//! Central error type for the coordinator.
//!
//! Every fallible call site in this crate returns `Result<T>` from this
//! module rather than ad hoc string errors, so a single `IntoResponse` impl
//! and a single control-channel disconnect mapping cover every failure kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("transport closed")]
    TransportClosed,

    #[error("unknown control event: {0}")]
    UnknownEvent(String),

    #[error("malformed control payload: {0}")]
    BadPayload(String),

    #[error("pipeline already exists")]
    PipelineAlreadyExists,

    #[error("host already held")]
    HostAlreadyHeld,

    #[error("not authenticated")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("session handshake rejected: locked")]
    Locked,

    #[error("disconnected: {0}")]
    Disconnect(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("webrtc error: {0}")]
    WebRtc(String),

    #[error("desktop backend error: {0}")]
    Desktop(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::UnknownEvent(_) | AppError::BadPayload(_) => StatusCode::BAD_REQUEST,
            AppError::PipelineAlreadyExists | AppError::HostAlreadyHeld | AppError::Locked => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short reason string surfaced to clients via `system/disconnect` (§6).
    pub fn disconnect_reason(&self) -> String {
        match self {
            AppError::Unauthorized => "invalid_password".to_string(),
            AppError::Forbidden(_) => "banned".to_string(),
            AppError::Locked | AppError::HostAlreadyHeld => "locked".to_string(),
            AppError::Disconnect(reason) => reason.clone(),
            _ => "error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::error!(
            error_type = std::any::type_name_of_val(&self),
            error_message = %body.message,
            "request failed"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;
