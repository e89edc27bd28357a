//! Per-component error types that compose into [`mend_common::RepairError`]
//! at the orchestrator boundary.

use mend_common::RepairError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The diff tool exited non-zero for a reason other than ordinary hunk
    /// rejection (no `*.rej` files were produced).
    #[error("diff tool failed with no rejection artifacts:\n{output}")]
    ToolFailed { output: String },

    #[error("patch targets a file absent from the checkout: {file}")]
    MissingFile { file: PathBuf },

    #[error("git command failed: {command}\n{output}")]
    GitFailed { command: String, output: String },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed rejection artifact {path}: {reason}")]
    MalformedRejectFile { path: PathBuf, reason: String },

    #[error("a failed hunk referenced {file}, which has no rejection artifact on disk")]
    MissingRejectArtifact { file: PathBuf },
}

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("build command failed: {0}")]
    Spawn(String),
}

impl From<ApplyError> for RepairError {
    fn from(err: ApplyError) -> Self {
        RepairError::Other(err.into())
    }
}

impl From<ExtractError> for RepairError {
    fn from(err: ExtractError) -> Self {
        RepairError::Other(err.into())
    }
}

impl From<ValidateError> for RepairError {
    fn from(err: ValidateError) -> Self {
        RepairError::Other(err.into())
    }
}

/// Maps an [`mend_llm::LlmError`] onto the repair-loop taxonomy: retryable
/// transport problems surface as `LlmApiFailure` once the client's own
/// retry budget is exhausted, format problems as `PatchFormatInvalid`.
pub fn llm_error_to_repair_error(err: mend_llm::LlmError, attempts: u32) -> RepairError {
    use mend_llm::LlmError::*;
    match err {
        FormatInvalid(reason) => RepairError::PatchFormatInvalid { reason },
        NoPatchFound => RepairError::PatchFormatInvalid {
            reason: "no patch found in LLM response".to_string(),
        },
        Truncated { .. } => RepairError::PatchFormatInvalid {
            reason: err.to_string(),
        },
        other => RepairError::LlmApiFailure {
            attempts,
            message: other.to_string(),
        },
    }
}
