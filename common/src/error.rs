//! The repair-loop error taxonomy shared by every stage of the pipeline.
//!
//! Each pipeline crate (`mend-core`, `mend-llm`) defines its own narrow,
//! `thiserror`-derived error type for the failures it can actually produce,
//! then converts into [`RepairError`] at the orchestrator boundary. This
//! mirrors the source's one-error-kind-per-condition table in the error
//! handling design: the taxonomy is flat and user-facing, not a wrapper
//! around every internal `Result`.

use thiserror::Error;

/// The category a repair attempt (or a whole patch) failed with.
///
/// Each variant corresponds to one row of the error taxonomy: how it is
/// detected, whether the loop can recover locally, and how far it surfaces
/// is documented on the orchestrator, not here.
#[derive(Debug, Error)]
pub enum RepairError {
    /// The complexity score computed from the initial apply attempt exceeded
    /// the configured threshold; no LLM call was made.
    #[error("patch complexity {score} exceeds threshold {threshold}")]
    ComplexityTooHigh { score: u32, threshold: u32 },

    /// The LLM backend failed after exhausting the retry budget.
    #[error("LLM backend call failed after {attempts} attempt(s): {message}")]
    LlmApiFailure { attempts: u32, message: String },

    /// The model's reply did not contain a recognizable, complete patch.
    #[error("LLM response was not a valid patch: {reason}")]
    PatchFormatInvalid { reason: String },

    /// The external build validator exited non-zero.
    #[error("build failed:\n{output}")]
    BuildFailed { output: String },

    /// The candidate patch's changed-line count diverged too far from the
    /// original's.
    #[error(
        "semantic drift: candidate changed {candidate_lines} lines, original changed {original_lines} (ratio {ratio:.2} > {limit:.2})"
    )]
    SemanticDrift {
        original_lines: usize,
        candidate_lines: usize,
        ratio: f64,
        limit: f64,
    },

    /// The attempt budget was consumed without a successful repair.
    #[error("exhausted {max_attempts} attempt(s) without a successful repair")]
    MaxAttemptsExceeded { max_attempts: u32 },

    /// A collaborator subprocess or I/O operation failed in a way not
    /// covered by the categories above (missing file, malformed patch
    /// header, VCS error, ...).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepairError {
    /// Whether this error terminates the whole patch (vs. just the current
    /// attempt, which the orchestrator may still retry).
    pub fn halts_patch(&self) -> bool {
        matches!(
            self,
            RepairError::ComplexityTooHigh { .. } | RepairError::MaxAttemptsExceeded { .. }
        )
    }
}
