//! Job failure taxonomy.

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::intake::IntakeError;
use crate::residency::{AcquireError, SlotKey};

use super::export::ExportError;

/// Machine-readable failure class carried by `Failed` progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Capability missing or misconfigured; needs an operator fix.
    EngineUnavailable,
    LoadFailed,
    /// Bad or corrupt image; needs new input.
    InvalidInput,
    InferenceError,
    /// No usable output; treated like an inference failure.
    ExportError,
    Cancelled,
}

impl ErrorKind {
    /// Whether resubmitting the same job may succeed.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::LoadFailed | ErrorKind::InferenceError | ErrorKind::ExportError
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::EngineUnavailable => "engine_unavailable",
            ErrorKind::LoadFailed => "load_failed",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InferenceError => "inference_error",
            ErrorKind::ExportError => "export_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("{key} engine unavailable: {message}")]
    EngineUnavailable { key: SlotKey, message: String },
    #[error("{key} engine failed to load after {attempts} attempt(s): {message}")]
    LoadFailed {
        key: SlotKey,
        message: String,
        attempts: u32,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("inference failed: {0}")]
    InferenceError(String),
    #[error("export failed: {0}")]
    ExportError(String),
    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
            JobError::LoadFailed { .. } => ErrorKind::LoadFailed,
            JobError::InvalidInput(_) => ErrorKind::InvalidInput,
            JobError::InferenceError(_) => ErrorKind::InferenceError,
            JobError::ExportError(_) => ErrorKind::ExportError,
            JobError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }
}

impl From<AcquireError> for JobError {
    fn from(e: AcquireError) -> Self {
        match e {
            AcquireError::EngineUnavailable { key, message } => {
                JobError::EngineUnavailable { key, message }
            }
            AcquireError::LoadFailed {
                key,
                message,
                attempts,
            } => JobError::LoadFailed {
                key,
                message,
                attempts,
            },
        }
    }
}

impl From<IntakeError> for JobError {
    fn from(e: IntakeError) -> Self {
        JobError::InvalidInput(e.to_string())
    }
}

impl From<EngineError> for JobError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Run(message) => JobError::InferenceError(message),
            other => JobError::InferenceError(other.to_string()),
        }
    }
}

impl From<ExportError> for JobError {
    fn from(e: ExportError) -> Self {
        JobError::ExportError(e.to_string())
    }
}
