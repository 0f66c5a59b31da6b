//! Centralized error types for Huddle.
//!
//! Uses `thiserror` for ergonomic error definitions. [`SignalingError`] covers every
//! refusal the call router can hand back to a client and knows how to turn itself into a
//! `call-error` event; [`HuddleError`] covers infrastructure failures.

use crate::protocol::{CallError, ServerEvent};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// A call-lifecycle request the router refused.
///
/// The `Display` text is exactly what the client sees in `call-error.message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    #[error("Invalid message: {0}")]
    InvalidPayload(String),

    #[error("Join the lobby first")]
    NotJoined,

    #[error("User is not available")]
    TargetUnavailable,

    #[error("You cannot call yourself")]
    SelfCall,

    #[error("You are already in a call")]
    AlreadyInCall,

    #[error("User is busy")]
    TargetBusy,

    #[error("Call id already used")]
    DuplicateCallId,

    #[error("Call is no longer available")]
    StaleCall,
}

impl SignalingError {
    /// Numeric code sent alongside the message (4xxx = client mistake or race).
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidPayload(_) => 4000,
            Self::NotJoined => 4003,
            Self::TargetUnavailable => 4004,
            Self::SelfCall => 4005,
            Self::AlreadyInCall => 4009,
            Self::TargetBusy => 4010,
            Self::DuplicateCallId => 4011,
            Self::StaleCall => 4012,
        }
    }

    /// Error code string for logs and programmatic handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::NotJoined => "NOT_JOINED",
            Self::TargetUnavailable => "TARGET_UNAVAILABLE",
            Self::SelfCall => "SELF_CALL",
            Self::AlreadyInCall => "ALREADY_IN_CALL",
            Self::TargetBusy => "TARGET_BUSY",
            Self::DuplicateCallId => "DUPLICATE_CALL_ID",
            Self::StaleCall => "STALE_CALL",
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::CallError(CallError {
            message: self.to_string(),
            code: self.code(),
        })
    }
}

/// Infrastructure and startup errors.
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} is unavailable")]
    Unavailable(&'static str),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl HuddleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Json(_) => "INVALID_JSON",
            Self::Io(_) => "IO_ERROR",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Error response body for the HTTP endpoints.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub error: String,
    pub message: String,
}

impl IntoResponse for HuddleError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't leak internal details to clients
        let message = match &self {
            HuddleError::Config(_) | HuddleError::Io(_) | HuddleError::Internal(_) => {
                tracing::error!("Internal error: {self}");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorResponse {
            code: status.as_u16(),
            error: self.error_code().to_string(),
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results using HuddleError.
pub type HuddleResult<T> = Result<T, HuddleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_target_message_is_stable() {
        let ServerEvent::CallError(err) = SignalingError::TargetUnavailable.to_event() else {
            panic!("expected call-error");
        };
        assert_eq!(err.message, "User is not available");
        assert_eq!(err.code, 4004);
    }

    #[test]
    fn internal_errors_map_to_500_without_details() {
        let err = HuddleError::Internal(anyhow::anyhow!("socket table corrupted"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert_eq!(
            HuddleError::Unavailable("router").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
