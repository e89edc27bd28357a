//! Prompt Builder & LLM Client: the rate-limited, retrying transport to
//! the remote model, plus reply parsing and format validation.
//!
//! This crate knows nothing about patches or checkouts; `mend-core` builds
//! the actual repair prompt text and feeds it through [`GenerateRequest`].

pub mod client;
pub mod error;
pub mod response;
pub mod types;

pub use client::{HttpBackend, LlmBackend, RateLimitedClient, RateLimiter, output_token_budget};
pub use error::{LlmError, Result};
pub use response::{MetadataPresence, check_metadata_presence, extract_patch, validate_patch_format};
pub use types::{GenerateRequest, GenerateResponse, TokenUsage, estimate_cost, resolve_inference_profile};
