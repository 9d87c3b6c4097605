//! Failure taxonomy for the execution pipeline.
//!
//! Every non-success path is one of these categories; the outcome's
//! [`ExecStatus`] is derived from the category and the `Display` text is
//! what callers see as `error_summary`. Internal defects surface with a
//! generic message — details go to the log, never to the caller.

use thiserror::Error;

use crate::outcome::ExecStatus;
use crate::request::RequestError;
use crate::validator::Rejection;

#[derive(Debug, Error)]
pub enum ExecError {
    /// Admission denied before anything ran: request bounds or static
    /// validation.
    #[error("validation failed: {reason}")]
    ValidationRejected { reason: String },

    /// The OS refused to start the child, or the child could not be fully
    /// limited.
    #[error("failed to start interpreter: {0}")]
    SpawnFailed(String),

    /// The child ran and exited abnormally on its own.
    #[error("{summary}")]
    ChildRuntime { summary: String },

    /// The wall-clock deadline enforcer fired.
    #[error("execution timed out after {limit_secs} seconds")]
    Timeout { limit_secs: u64 },

    /// The memory enforcer fired, or the OS killed the child for exceeding
    /// its address-space cap.
    #[error("memory limit exceeded ({limit_mib} MiB)")]
    MemoryExceeded { limit_mib: u64 },

    /// The caller cancelled the request.
    #[error("execution cancelled")]
    Cancelled,

    /// Unexpected supervisor failure.
    #[error("internal error")]
    InternalDefect,
}

impl ExecError {
    /// The outcome classification this category maps to.
    pub fn status(&self) -> ExecStatus {
        match self {
            Self::Timeout { .. } => ExecStatus::Timeout,
            Self::MemoryExceeded { .. } => ExecStatus::MemoryExceeded,
            _ => ExecStatus::Error,
        }
    }
}

impl From<RequestError> for ExecError {
    fn from(e: RequestError) -> Self {
        Self::ValidationRejected {
            reason: e.to_string(),
        }
    }
}

impl From<Rejection> for ExecError {
    fn from(e: Rejection) -> Self {
        Self::ValidationRejected {
            reason: e.to_string(),
        }
    }
}

impl From<pyrunner_sandbox::SpawnError> for ExecError {
    fn from(e: pyrunner_sandbox::SpawnError) -> Self {
        Self::SpawnFailed(e.to_string())
    }
}
