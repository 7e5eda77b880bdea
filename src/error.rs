//! Typed errors for the voice session engine.
//!
//! The taxonomy mirrors how failures surface to the caller: acquisition
//! errors from `start()`, protocol errors from the backend call, stream
//! errors from the push-stream, and decode errors on individual payloads.

use thiserror::Error;

/// Errors surfaced by the session engine.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The OS refused microphone access.
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// No usable input or output device, or the device went away.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// `start()` was called while a session is already live.
    #[error("a voice session is already active")]
    AlreadyActive,

    /// The backend call failed or returned a malformed response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The push-stream transport was lost.
    #[error("push-stream lost: {0}")]
    Stream(String),

    /// The backend reported the task as failed.
    #[error("backend reported task failure")]
    TaskFailed,

    /// An audio payload could not be decoded.
    #[error("invalid audio payload: {0}")]
    Decode(String),
}

/// Distinguish a permission refusal from a missing device in a
/// backend-specific cpal error. cpal reports both through the same
/// variant, with only the description to go on.
fn classify_backend(description: String) -> SessionError {
    let lower = description.to_lowercase();
    if lower.contains("permission") || lower.contains("access denied") {
        SessionError::PermissionDenied(description)
    } else {
        SessionError::DeviceUnavailable(description)
    }
}

impl From<cpal::DevicesError> for SessionError {
    fn from(err: cpal::DevicesError) -> Self {
        SessionError::DeviceUnavailable(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for SessionError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::BackendSpecific { err } => {
                classify_backend(err.description)
            }
            other => SessionError::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for SessionError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::BackendSpecific { err } => classify_backend(err.description),
            other => SessionError::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for SessionError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::BackendSpecific { err } => classify_backend(err.description),
            other => SessionError::DeviceUnavailable(other.to_string()),
        }
    }
}
