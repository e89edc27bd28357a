//! Repair-loop configuration, loaded from a TOML file and overridden by
//! environment variables, matching the layered config the invoking CLI
//! assembles before handing a [`RepairConfig`] to the orchestrator.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of refinement attempts per patch before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default complexity gate: `failed_hunks + rejected_files` above this
/// skips the LLM entirely.
pub const DEFAULT_COMPLEXITY_THRESHOLD: u32 = 20;

/// Default minimum gap between outbound LLM requests.
pub const DEFAULT_MIN_REQUEST_GAP: Duration = Duration::from_millis(1_000);

/// Lower/upper bounds clamping the proportional output-token budget.
pub const DEFAULT_MIN_OUTPUT_TOKENS: u32 = 1_024;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 65_536;

/// Environment variable that suppresses the build-validation step.
pub const SKIP_VALIDATION_ENV: &str = "SKIP_VALIDATION";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Name of the project whose patches are being repaired; used for
    /// logging and as the `project identifier` prompt section.
    pub project: String,

    /// PR number this repair run is associated with, for tracing only.
    #[serde(default)]
    pub pr_number: Option<u64>,

    /// LLM model identifier to request.
    pub model: String,

    /// Maximum refinement attempts per patch.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Complexity gate threshold (see [`DEFAULT_COMPLEXITY_THRESHOLD`]).
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: u32,

    /// Minimum gap between LLM requests, in milliseconds.
    #[serde(default = "default_min_request_gap_ms")]
    pub min_request_gap_ms: u64,

    /// Output-token budget clamp, lower bound.
    #[serde(default = "default_min_output_tokens")]
    pub min_output_tokens: u32,

    /// Output-token budget clamp, upper bound.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Semantic-drift ratio above which a candidate is rejected.
    #[serde(default = "default_drift_limit")]
    pub drift_limit: f64,

    /// USD per million input tokens, for the cost accounting attached to
    /// each successful `PatchFix` (deployment-specific pricing, not a
    /// backend contract — see `mend_llm::estimate_cost`).
    #[serde(default)]
    pub input_price_per_mtok: f64,

    /// USD per million output tokens.
    #[serde(default)]
    pub output_price_per_mtok: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_complexity_threshold() -> u32 {
    DEFAULT_COMPLEXITY_THRESHOLD
}

fn default_min_request_gap_ms() -> u64 {
    DEFAULT_MIN_REQUEST_GAP.as_millis() as u64
}

fn default_min_output_tokens() -> u32 {
    DEFAULT_MIN_OUTPUT_TOKENS
}

fn default_max_output_tokens() -> u32 {
    DEFAULT_MAX_OUTPUT_TOKENS
}

fn default_drift_limit() -> f64 {
    1.5
}

impl RepairConfig {
    pub fn min_request_gap(&self) -> Duration {
        Duration::from_millis(self.min_request_gap_ms)
    }

    /// Whether the build-validation step should be suppressed for this run.
    ///
    /// This reads the environment directly on every call rather than being
    /// cached on the struct: it is a test escape hatch, not a product
    /// setting, and the source treats it the same way.
    pub fn skip_validation() -> bool {
        std::env::var(SKIP_VALIDATION_ENV).as_deref() == Ok("true")
    }

    /// Load configuration from a TOML file, applying the same defaults a
    /// missing field would get from serde.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
