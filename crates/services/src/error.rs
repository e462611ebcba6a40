//! Shared error types for the services crate.

use thiserror::Error;

use assess_core::model::{SessionMode, SessionRecordError};
use storage::repository::StorageError;

use crate::sessions::SessionPhase;

/// Errors returned by a `SessionProvider` when a session cannot be granted.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("invalid access code")]
    InvalidAccessCode,
    #[error("assessment already started")]
    AlreadyStarted,
    #[error("session provider unavailable: {0}")]
    Unavailable(String),
}

/// The judge could not be reached or returned no usable verdict.
///
/// Failing code is not an error: it comes back as a `Verdict` with `error` set.
#[derive(Debug, Error)]
#[error("judge unavailable: {0}")]
pub struct JudgeUnavailable(pub String);

/// The final score could not be recorded.
#[derive(Debug, Error)]
#[error("score submission failed: {0}")]
pub struct SinkError(pub String);

/// Errors emitted by the HTTP backend client before they are mapped onto a
/// collaborator error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("backend request failed with status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors emitted while reading backend configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error(transparent)]
    Client(#[from] reqwest::Error),
}

/// Errors emitted by the session engine and active sessions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("no problems available for session")]
    Empty,
    #[error("session time limit must be positive")]
    InvalidTimeLimit,
    #[error("problem index {index} out of range for {count} problems")]
    InvalidProblemIndex { index: usize, count: usize },
    #[error("session is {phase}")]
    NotActive { phase: SessionPhase },
    #[error("operation not available in {mode} mode")]
    ModeMismatch { mode: SessionMode },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Judge(#[from] JudgeUnavailable),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Record(#[from] SessionRecordError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    /// True when a later `submit` may succeed without user intervention.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Sink(_))
    }
}
