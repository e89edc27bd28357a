//! Error taxonomy for the LLM backend client.
//!
//! Shaped after a request/response JSON API with a requests-per-minute
//! ceiling: transport failures are distinguished from the backend's own
//! "please retry" signal, and both are distinguished from a reply that
//! parsed fine but did not contain a usable patch.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    /// The HTTP transport failed (connect, timeout, TLS, ...).
    #[error("network error: {0}")]
    Network(String),

    /// The backend responded with a rate-limit status (HTTP 429), as
    /// distinct from a generic transient server error: the backend itself
    /// is telling us to slow down, optionally naming a delay.
    #[error("rate limit exceeded: {message}")]
    RateLimitExceeded {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The backend reported an error with its own code/message.
    #[error("backend error {code}: {message}")]
    Backend { code: String, message: String },

    /// The response body could not be parsed as the expected JSON shape.
    #[error("failed to parse backend response: {0}")]
    Parse(String),

    /// A transient error the caller should retry, optionally with a
    /// backend-suggested delay.
    #[error("retryable error: {message}")]
    Retryable {
        message: String,
        delay: Option<Duration>,
    },

    /// The reply did not contain a recognizable patch (no fenced block or
    /// `From `/`diff --git` marker anywhere in the text).
    #[error("no patch found in LLM response")]
    NoPatchFound,

    /// The extracted patch is missing a required marker (`@@` hunk header,
    /// or `---`/`+++` file markers).
    #[error("patch format invalid: {0}")]
    FormatInvalid(String),

    /// Reported output tokens reached the requested ceiling; the patch is
    /// almost certainly cut off mid-hunk.
    #[error("response truncated at {output_tokens} output tokens (ceiling {ceiling})")]
    Truncated { output_tokens: u32, ceiling: u32 },
}

impl LlmError {
    /// Transient failures the rate-limited client should retry with
    /// backoff; format/content problems are not retried by the client
    /// itself (the orchestrator decides whether a fresh attempt is worth
    /// it).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Retryable { .. } | LlmError::RateLimitExceeded { .. } | LlmError::Network(_)
        )
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            LlmError::Retryable { delay, .. } => *delay,
            LlmError::RateLimitExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("request timed out: {err}"))
        } else if err.is_connect() {
            LlmError::Network(format!("connection failed: {err}"))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Parse(err.to_string())
    }
}

/// Parse a retry-after delay from a backend error message, e.g.
/// `"rate limited, try again in 5s"` or `"...in 500ms"`.
pub fn parse_retry_after(message: &str) -> Option<Duration> {
    use regex::Regex;
    let re = Regex::new(r"(?i)try again in ([0-9]+(?:\.[0-9]+)?)\s*(ms|s|seconds?)").ok()?;
    let caps = re.captures(message)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    if unit == "ms" {
        Some(Duration::from_millis(value as u64))
    } else {
        Some(Duration::from_secs_f64(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_and_milliseconds() {
        assert_eq!(
            parse_retry_after("try again in 5s"),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            parse_retry_after("try again in 500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_retry_after("no hint here"), None);
    }

    #[test]
    fn retryable_classification() {
        assert!(LlmError::Network("boom".into()).is_retryable());
        assert!(
            LlmError::RateLimitExceeded {
                message: "slow down".into(),
                retry_after: Some(Duration::from_secs(2)),
            }
            .is_retryable()
        );
        assert!(!LlmError::FormatInvalid("missing @@".into()).is_retryable());
        assert!(!LlmError::NoPatchFound.is_retryable());
    }

    #[test]
    fn rate_limit_exceeded_carries_its_own_retry_delay() {
        let err = LlmError::RateLimitExceeded {
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(3)));
    }
}
