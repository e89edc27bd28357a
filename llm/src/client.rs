//! The rate-limited LLM client: a process-wide dispatch serializer wrapped
//! around a pluggable [`LlmBackend`] transport, plus retry-with-backoff on
//! transient failures.

use crate::error::{LlmError, Result, parse_retry_after};
use crate::types::{GenerateRequest, GenerateResponse};
use async_trait::async_trait;
use std::future::Future;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A pluggable LLM transport. The patch-repair core never talks to a
/// concrete backend directly; it depends on this trait so that tests can
/// substitute a mock without a live network call.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse>;
}

/// Serializes outbound calls through a single mutex and enforces a minimum
/// gap between dispatches, tracked as the timestamp of the last
/// successful call.
pub struct RateLimiter {
    last_call: Mutex<Option<Instant>>,
    min_gap: Duration,
}

impl RateLimiter {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            last_call: Mutex::new(None),
            min_gap,
        }
    }

    /// A process-wide singleton, so that independently constructed clients
    /// still serialize against one another. Only the first caller's
    /// `min_gap` takes effect; later callers observe the gap already
    /// configured.
    pub fn global(min_gap: Duration) -> &'static RateLimiter {
        static INSTANCE: OnceLock<RateLimiter> = OnceLock::new();
        INSTANCE.get_or_init(|| RateLimiter::new(min_gap))
    }

    /// Runs `dispatch` once the minimum gap since the last dispatch has
    /// elapsed. Holding the lock across `dispatch` itself serializes
    /// concurrent callers rather than merely pacing them.
    pub async fn run<F, Fut, T>(&self, dispatch: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut guard = self.last_call.lock().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.min_gap {
                let remaining = self.min_gap - elapsed;
                debug!(?remaining, "sleeping to respect LLM rate limit");
                tokio::time::sleep(remaining).await;
            }
        }
        let result = dispatch().await;
        *guard = Some(Instant::now());
        result
    }
}

/// Wraps a backend with rate-limit discipline and bounded exponential
/// backoff on retryable transport errors.
pub struct RateLimitedClient<B> {
    backend: B,
    limiter: &'static RateLimiter,
    max_retries: u32,
    /// Static `(model id, regional inference-profile alias)` table applied
    /// before dispatch (§6); empty by default, since most model ids pass
    /// through unchanged.
    region_aliases: Vec<(String, String)>,
}

impl<B: LlmBackend> RateLimitedClient<B> {
    pub fn new(backend: B, min_gap: Duration, max_retries: u32) -> Self {
        Self {
            backend,
            limiter: RateLimiter::global(min_gap),
            max_retries,
            region_aliases: Vec::new(),
        }
    }

    /// Registers the model-id → inference-profile alias table consulted
    /// before every dispatch.
    pub fn with_region_aliases(mut self, aliases: Vec<(String, String)>) -> Self {
        self.region_aliases = aliases;
        self
    }

    /// Applies [`resolve_inference_profile`] against the registered alias
    /// table, returning a request with `model` translated if needed.
    fn aliased_request(&self, request: &GenerateRequest) -> GenerateRequest {
        let aliases: Vec<(&str, &str)> = self
            .region_aliases
            .iter()
            .map(|(id, alias)| (id.as_str(), alias.as_str()))
            .collect();
        let model = crate::types::resolve_inference_profile(&request.model, &aliases);
        GenerateRequest {
            model,
            ..request.clone()
        }
    }

    /// Dispatches `request`, retrying transient failures with exponential
    /// backoff starting at the limiter's minimum gap, then checks the
    /// reported output-token count against the requested ceiling to catch
    /// truncated replies before they reach validation.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let request = self.aliased_request(request);
        let request = &request;
        let mut backoff = self.limiter.min_gap;
        let mut attempt: u32 = 0;
        loop {
            let outcome = self
                .limiter
                .run(|| self.backend.generate(request))
                .await;
            match outcome {
                Ok(response) => {
                    if response.usage.output_tokens >= request.max_output_tokens {
                        return Err(LlmError::Truncated {
                            output_tokens: response.usage.output_tokens,
                            ceiling: request.max_output_tokens,
                        });
                    }
                    return Ok(response);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let wait = err.retry_delay().unwrap_or(backoff);
                    warn!(attempt, ?wait, error = %err, "retrying LLM call");
                    tokio::time::sleep(wait).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Computes the output-token ceiling for a repair attempt: roughly 2/3 of
/// the input patch's character count, clamped into `[min, max]`.
pub fn output_token_budget(input_patch_chars: usize, min: u32, max: u32) -> u32 {
    let proportional = (input_patch_chars as f64 * (2.0 / 3.0)) as u64;
    proportional.clamp(min as u64, max as u64) as u32
}

/// A concrete HTTP-backed [`LlmBackend`] for a JSON request/response API.
pub struct HttpBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpBackend {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for HttpBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RateLimitExceeded {
                message: body.clone(),
                retry_after: retry_after.or_else(|| parse_retry_after(&body)),
            });
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Retryable {
                message: format!("server error {status}: {body}"),
                delay: None,
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend {
                code: status.to_string(),
                message: body,
            });
        }

        let body: GenerateResponse = response.json().await.map_err(LlmError::from)?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingBackend {
        calls: Arc<AtomicU32>,
        fail_first: u32,
    }

    #[async_trait]
    impl LlmBackend for CountingBackend {
        async fn generate(&self, _request: &GenerateRequest) -> Result<GenerateResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(LlmError::Retryable {
                    message: "try again in 1ms".to_string(),
                    delay: Some(Duration::from_millis(1)),
                });
            }
            Ok(GenerateResponse {
                content: "diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b".to_string(),
                usage: TokenUsage {
                    input_tokens: 10,
                    output_tokens: 20,
                },
            })
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "claude-opus-4".to_string(),
            system_prompt: "repair this patch".to_string(),
            user_prompt: "...".to_string(),
            max_output_tokens: 1_000,
            extended_output: false,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_up_to_the_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let backend = CountingBackend {
            calls: calls.clone(),
            fail_first: 2,
        };
        let client = RateLimitedClient::new(backend, Duration::from_millis(1), 5);
        let response = client.generate(&request()).await.unwrap();
        assert_eq!(response.usage.output_tokens, 20);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn truncated_output_is_rejected() {
        struct TruncatingBackend;
        #[async_trait]
        impl LlmBackend for TruncatingBackend {
            async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
                Ok(GenerateResponse {
                    content: "diff --git a/x b/x\n@@ -1 +1 @@\n-a".to_string(),
                    usage: TokenUsage {
                        input_tokens: 10,
                        output_tokens: request.max_output_tokens,
                    },
                })
            }
        }
        let client = RateLimitedClient::new(TruncatingBackend, Duration::from_millis(1), 0);
        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Truncated { .. }));
    }

    #[tokio::test]
    async fn region_alias_is_applied_before_dispatch() {
        struct EchoModelBackend {
            seen_model: Arc<std::sync::Mutex<Option<String>>>,
        }
        #[async_trait]
        impl LlmBackend for EchoModelBackend {
            async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
                *self.seen_model.lock().unwrap_or_else(|e| e.into_inner()) = Some(request.model.clone());
                Ok(GenerateResponse {
                    content: "diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b".to_string(),
                    usage: TokenUsage {
                        input_tokens: 1,
                        output_tokens: 1,
                    },
                })
            }
        }
        let seen_model = Arc::new(std::sync::Mutex::new(None));
        let backend = EchoModelBackend {
            seen_model: seen_model.clone(),
        };
        let client = RateLimitedClient::new(backend, Duration::from_millis(1), 0).with_region_aliases(vec![(
            "claude-opus-4".to_string(),
            "us.anthropic.claude-opus-4-v1:0".to_string(),
        )]);
        client.generate(&request()).await.unwrap();
        assert_eq!(
            seen_model.lock().unwrap_or_else(|e| e.into_inner()).as_deref(),
            Some("us.anthropic.claude-opus-4-v1:0")
        );
    }

    #[test]
    fn token_budget_is_clamped() {
        assert_eq!(output_token_budget(100, 1_024, 65_536), 1_024);
        assert_eq!(output_token_budget(10_000_000, 1_024, 65_536), 65_536);
        let mid = output_token_budget(9_000, 1_024, 65_536);
        assert_eq!(mid, (9_000 * 2 / 3) as u32);
    }

    #[tokio::test]
    async fn http_backend_parses_a_successful_reply() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-a\n+b",
                "usage": {"input_tokens": 42, "output_tokens": 7},
            })))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(format!("{}/v1/generate", server.uri()), "test-key");
        let response = backend.generate(&request()).await.unwrap();
        assert_eq!(response.usage.input_tokens, 42);
        assert!(response.content.starts_with("diff --git"));
    }

    #[tokio::test]
    async fn http_backend_surfaces_rate_limit_as_retryable() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generate"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new(format!("{}/v1/generate", server.uri()), "test-key");
        let err = backend.generate(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(2)));
    }
}
