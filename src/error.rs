//! # Error Handling
//!
//! Defines the application error type and how each variant maps to an HTTP
//! response and to the relay's failure policy.
//!
//! ## Error Categories:
//! - **BadRequest**: malformed client input (bad envelope, bad base64, wrong
//!   frame length). Logged and dropped; the connection stays open.
//! - **NotFound**: a session id that was never registered or already removed.
//! - **Service**: a transcription/response/synthesis collaborator failed.
//!   Caught at the pipeline boundary and surfaced to the user as a generic
//!   error message.
//! - **TransportClosed**: delivery to a client whose socket is gone. Treated
//!   as an implicit disconnect, never retried.
//! - **ConfigError**: invalid startup configuration. The only fatal category,
//!   and only at startup.
//! - **Internal**: anything else server-side.
//!
//! Nothing except `ConfigError` at startup may terminate the process or the
//! connection registry.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the voice relay.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested session (or other resource) does not exist
    NotFound(String),

    /// An external collaborator (transcriber, responder, synthesizer) failed
    Service(String),

    /// The client transport is closed; the session is being torn down
    TransportClosed(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Internal server errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Service(msg) => write!(f, "Service error: {}", msg),
            AppError::TransportClosed(msg) => write!(f, "Transport closed: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Conversion of errors into HTTP responses for the REST surface.
///
/// ## HTTP Status Code Mapping:
/// - BadRequest → 400
/// - NotFound → 404
/// - Service → 502 (the upstream collaborator failed, not this server)
/// - TransportClosed/ConfigError/Internal → 500
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "Audio data length must be even for 16-bit samples",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,
                "not_found",
                msg.clone(),
            ),
            AppError::Service(msg) => (
                actix_web::http::StatusCode::BAD_GATEWAY,
                "service_error",
                msg.clone(),
            ),
            AppError::TransportClosed(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "transport_closed",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing failures are client errors: the envelope was malformed.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Audio payloads arrive base64-encoded; a decode failure is client input.
impl From<base64::DecodeError> for AppError {
    fn from(err: base64::DecodeError) -> Self {
        AppError::BadRequest(format!("Base64 decoding error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// HTTP failures talking to a collaborator are service errors.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Service(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
