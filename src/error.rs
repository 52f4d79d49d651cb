//! # Error Handling
//!
//! This module defines every error type the service can produce, from HTTP
//! handler failures to the voice-session taxonomy used by the adapters, the
//! response pipeline and the per-connection state machine.
//!
//! ## Two families of errors:
//!
//! ### HTTP errors (`AppError`)
//! - Returned by the operational HTTP routes (`/health`, `/api/v1/...`)
//! - Converted into JSON bodies through actix-web's `ResponseError` trait
//!
//! ### Voice-session errors
//! - **DecodeError**: the buffered audio could not be turned into PCM
//! - **TranscribeError**: the speech-to-text collaborator failed
//! - **SynthesizeError**: the text-to-speech collaborator failed
//! - **ProtocolError**: the client sent something that does not fit the current state
//! - **ConnectionError**: the connection is over (idle timeout or disconnect)
//!
//! ## Propagation policy:
//! Decode/transcribe/synthesize failures never leave the response pipeline;
//! they become `error` messages for the client. Protocol errors are logged and
//! counted. Only `ConnectionError` ends a connection.

use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait
use std::time::Duration;

/// Custom error types for the HTTP side of the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Requested resource was not found
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

/// Converts `AppError` into a JSON HTTP response.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "No route for GET /ws/audio",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::NotFound(msg) => (
                actix_web::http::StatusCode::NOT_FOUND,  // 404
                "not_found",
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

/// Responses are built by the server, so a serialization failure is ours.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

/// Failure to turn buffered audio into canonical PCM.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("no audio bytes to decode")]
    Empty,

    #[error("container probe failed: {0}")]
    Probe(String),

    #[error("missing audio track")]
    MissingTrack,

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("reading packets failed: {0}")]
    Read(String),

    #[error("decoded stream contained no samples")]
    NoSamples,

    #[error("payload is a {0} container, not raw PCM")]
    ContainerPayload(&'static str),

    #[error("raw PCM payload has odd length {0}")]
    MisalignedPcm(usize),

    #[error("all {attempts} decode strategies failed")]
    Exhausted { attempts: usize },
}

/// Failure reported by a speech-to-text collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TranscribeError {
    /// The service answered but found no speech it could understand.
    #[error("speech could not be understood")]
    Unintelligible,

    /// The service could not be reached or answered with a server error.
    #[error("transcription service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("transcription failed: {0}")]
    Other(String),
}

/// Failure reported by a text-to-speech collaborator.
#[derive(Debug, thiserror::Error)]
pub enum SynthesizeError {
    #[error("nothing to synthesize")]
    EmptyText,

    #[error("synthesis request failed: {0}")]
    Request(String),

    #[error("synthesized audio is invalid: {0}")]
    InvalidAudio(String),

    #[error("primary and fallback synthesis both failed")]
    Exhausted,
}

/// Client input that does not fit the current session state.
///
/// All protocol errors are non-fatal: they are logged, counted and ignored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed control message: {0}")]
    MalformedControl(String),

    #[error("unknown control action in {0}")]
    UnknownAction(String),

    #[error("binary fragment out of order while {state}")]
    OutOfOrderFragment { state: &'static str },

    #[error("control `{action}` out of order while {state}")]
    OutOfOrderControl { action: &'static str, state: &'static str },
}

/// Reasons a connection ends. Both are fatal for the connection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    #[error("no client activity for {0:?}")]
    Timeout(Duration),

    #[error("transport disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("/nowhere".to_string());
        assert_eq!(err.to_string(), "Not found: /nowhere");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(AppError::NotFound("x".into()).error_response().status(), 404);
        assert_eq!(AppError::Internal("x".into()).error_response().status(), 500);
    }

    #[test]
    fn test_json_error_becomes_internal() {
        let err: AppError = serde_json::from_str::<u8>("not json").unwrap_err().into();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(err.error_response().status(), 500);
    }

    #[test]
    fn test_protocol_error_messages() {
        let err = ProtocolError::OutOfOrderFragment { state: "processing" };
        assert_eq!(err.to_string(), "binary fragment out of order while processing");
    }
}
