//! Request/response shapes for the LLM backend, treated as a black box
//! per the external-interfaces contract: a system prompt, a user prompt,
//! a max-output-tokens hint, and an "extended output" flag, in exchange
//! for reply text and a token usage report.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_output_tokens: u32,
    /// Allows outputs up to 128K tokens on backends that support it.
    pub extended_output: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Per-call cost in USD, derived from usage by the caller's pricing table;
/// kept out of this crate since pricing is a deployment concern, not a
/// backend contract.
pub fn estimate_cost(usage: TokenUsage, input_price_per_mtok: f64, output_price_per_mtok: f64) -> f64 {
    let input = usage.input_tokens as f64 / 1_000_000.0 * input_price_per_mtok;
    let output = usage.output_tokens as f64 / 1_000_000.0 * output_price_per_mtok;
    input + output
}

/// Translates a model identifier into a regional "inference profile" alias
/// when the backend requires it for a given identifier, before dispatch.
/// Identifiers with no entry pass through unchanged.
pub fn resolve_inference_profile(model: &str, region_aliases: &[(&str, &str)]) -> String {
    region_aliases
        .iter()
        .find(|(id, _)| *id == model)
        .map(|(_, alias)| alias.to_string())
        .unwrap_or_else(|| model.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaliased_model_passes_through() {
        let aliases = [("claude-opus-4", "us.anthropic.claude-opus-4-v1:0")];
        assert_eq!(
            resolve_inference_profile("claude-sonnet-4", &aliases),
            "claude-sonnet-4"
        );
    }

    #[test]
    fn aliased_model_is_translated() {
        let aliases = [("claude-opus-4", "us.anthropic.claude-opus-4-v1:0")];
        assert_eq!(
            resolve_inference_profile("claude-opus-4", &aliases),
            "us.anthropic.claude-opus-4-v1:0"
        );
    }

    #[test]
    fn cost_estimate_scales_with_usage() {
        let usage = TokenUsage {
            input_tokens: 2_000_000,
            output_tokens: 500_000,
        };
        let cost = estimate_cost(usage, 3.0, 15.0);
        assert!((cost - (6.0 + 7.5)).abs() < 1e-9);
    }
}
