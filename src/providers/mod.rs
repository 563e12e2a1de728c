/*!
 * Provider implementations for different text-generation backends.
 *
 * This module contains client implementations for the supported backends:
 * - Gemini: Google Generative Language API
 * - OpenAI: OpenAI chat completions API
 * - Anthropic: Anthropic messages API
 * - Scripted: deterministic in-process backend for tests and dry runs
 *
 * Adapters never retry. Each one classifies its failures into a
 * `FailureKind` and leaves the retry decision to the fallback policy.
 */

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

use crate::app_config::{ProviderConfig, ProviderKind};
use crate::errors::{FailureKind, ProviderError};
use crate::translation::prompts::Prompt;

pub mod anthropic;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod registry;

pub use anthropic::Anthropic;
pub use gemini::Gemini;
pub use mock::{ScriptedOutcome, ScriptedProvider};
pub use openai::OpenAI;
pub use registry::{ProviderHandle, ProviderRegistry, UnavailableProvider};

/// Model parameters for one call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationParams {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }
}

/// Usage reported for one successful call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    /// Prompt characters sent
    pub characters: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
}

/// Successful generation
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub usage: Usage,
}

/// Common trait for all providers
///
/// One call, no retries: a failure comes back tagged with its `FailureKind`.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Backend type
    fn kind(&self) -> ProviderKind;

    /// Generate text for a prompt
    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError>;
}

/// The closed set of supported backends
#[derive(Debug)]
pub enum ProviderAdapter {
    Gemini(Gemini),
    OpenAI(OpenAI),
    Anthropic(Anthropic),
    Scripted(ScriptedProvider),
}

impl ProviderAdapter {
    /// Construct the client for a configured backend.
    ///
    /// Missing credentials make the backend unavailable for the whole run.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        if config.kind.requires_credentials() && config.api_key.is_empty() {
            return Err(ProviderError::auth_failed(format!(
                "no API key configured for {} provider '{}'",
                config.kind.display_name(),
                config.name
            )));
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        match config.kind {
            ProviderKind::Gemini => Ok(Self::Gemini(Gemini::new(
                config.api_key.clone(),
                &config.endpoint,
                timeout,
            )?)),
            ProviderKind::OpenAI => Ok(Self::OpenAI(OpenAI::new(
                config.api_key.clone(),
                &config.endpoint,
                timeout,
            )?)),
            ProviderKind::Anthropic => Ok(Self::Anthropic(Anthropic::new(
                config.api_key.clone(),
                &config.endpoint,
                timeout,
            )?)),
            ProviderKind::Scripted => Ok(Self::Scripted(ScriptedProvider::named(&config.name))),
        }
    }
}

#[async_trait]
impl Provider for ProviderAdapter {
    fn kind(&self) -> ProviderKind {
        match self {
            Self::Gemini(p) => p.kind(),
            Self::OpenAI(p) => p.kind(),
            Self::Anthropic(p) => p.kind(),
            Self::Scripted(p) => p.kind(),
        }
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        match self {
            Self::Gemini(p) => p.generate(prompt, params).await,
            Self::OpenAI(p) => p.generate(prompt, params).await,
            Self::Anthropic(p) => p.generate(prompt, params).await,
            Self::Scripted(p) => p.generate(prompt, params).await,
        }
    }
}

/// Build a reqwest client with the call timeout
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::new(FailureKind::Unknown, format!("HTTP client: {}", e)))
}

/// Status table shared by the HTTP backends
pub(crate) fn classify_status(status: u16) -> FailureKind {
    match status {
        401 | 403 => FailureKind::AuthFailed,
        400 | 404 | 413 | 422 => FailureKind::InvalidRequest,
        429 => FailureKind::RateLimited,
        408 | 504 => FailureKind::Timeout,
        500 | 502 | 503 | 529 => FailureKind::ServiceUnavailable,
        s if s >= 500 => FailureKind::ServiceUnavailable,
        _ => FailureKind::Unknown,
    }
}

/// Classify a transport-level failure
pub(crate) fn classify_transport_error(provider: &str, error: &reqwest::Error) -> ProviderError {
    let kind = if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() {
        FailureKind::ServiceUnavailable
    } else {
        FailureKind::Unknown
    };

    ProviderError::new(
        kind,
        format!(
            "{} request failed: {}",
            provider,
            redact_error_message(&error.to_string())
        ),
    )
}

/// Read an error response body into a `ProviderError`
pub(crate) async fn error_from_response(
    provider: &str,
    response: reqwest::Response,
    classify: fn(u16, &str) -> FailureKind,
) -> ProviderError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to get error response text".to_string());

    let kind = classify(status, &body);
    let mut detail = redact_error_message(body.trim());
    if detail.len() > 500 {
        let cut = (0..=500).rev().find(|i| detail.is_char_boundary(*i)).unwrap_or(0);
        detail.truncate(cut);
    }

    ProviderError::new(kind, format!("{} API error ({}): {}", provider, status, detail))
}

/// USD per 1K tokens, (model, input, output)
pub(crate) type PricingTable = &'static [(&'static str, f64, f64)];

/// Approximate cost, when the model is in the table and tokens are known
pub(crate) fn estimate_cost(
    table: PricingTable,
    model: &str,
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
) -> Option<f64> {
    let (_, input, output) = table.iter().find(|(name, _, _)| *name == model)?;
    let prompt = prompt_tokens? as f64;
    let completion = completion_tokens.unwrap_or(0) as f64;
    Some(prompt / 1000.0 * input + completion / 1000.0 * output)
}

static URL_WITH_CREDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(https?://)[^:@\s]+:[^@\s]+@").unwrap());

static KEY_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)([?&]key=)[^&\s]+").unwrap());

static POTENTIAL_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(sk-|AIza)[A-Za-z0-9_-]{16,}").unwrap());

/// Strip credentials from messages before they reach logs or the ledger
pub(crate) fn redact_error_message(message: &str) -> String {
    let redacted = URL_WITH_CREDS.replace_all(message, "$1[REDACTED]@");
    let redacted = KEY_PARAM.replace_all(&redacted, "$1[REDACTED]");
    POTENTIAL_KEY
        .replace_all(&redacted, "[REDACTED_KEY]")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifyStatus_shouldMapCommonCodes() {
        assert_eq!(classify_status(401), FailureKind::AuthFailed);
        assert_eq!(classify_status(403), FailureKind::AuthFailed);
        assert_eq!(classify_status(400), FailureKind::InvalidRequest);
        assert_eq!(classify_status(429), FailureKind::RateLimited);
        assert_eq!(classify_status(503), FailureKind::ServiceUnavailable);
        assert_eq!(classify_status(599), FailureKind::ServiceUnavailable);
        assert_eq!(classify_status(504), FailureKind::Timeout);
        assert_eq!(classify_status(418), FailureKind::Unknown);
    }

    #[test]
    fn test_fromConfig_withoutApiKey_shouldBeAuthFailed() {
        let config = ProviderConfig::new(ProviderKind::OpenAI);
        let err = ProviderAdapter::from_config(&config).unwrap_err();
        assert_eq!(err.kind, FailureKind::AuthFailed);
        assert!(err.message.contains("openai"));
    }

    #[test]
    fn test_fromConfig_scripted_shouldNotNeedCredentials() {
        let config = ProviderConfig::new(ProviderKind::Scripted);
        let adapter = ProviderAdapter::from_config(&config).unwrap();
        assert_eq!(adapter.kind(), ProviderKind::Scripted);
    }

    #[test]
    fn test_estimateCost_shouldUsePer1kPricing() {
        const TABLE: PricingTable = &[("m", 0.001, 0.002)];
        let cost = estimate_cost(TABLE, "m", Some(2000), Some(500)).unwrap();
        assert!((cost - 0.003).abs() < 1e-12);
        assert!(estimate_cost(TABLE, "other", Some(10), Some(10)).is_none());
        assert!(estimate_cost(TABLE, "m", None, Some(10)).is_none());
    }

    #[test]
    fn test_redactErrorMessage_shouldHideKeys() {
        let message =
            "GET https://host/v1?key=AIzaSyABCDEFGHIJKLMNOPQRSTUV failed; sk-abcdefghijklmnopqrstuv";
        let redacted = redact_error_message(message);
        assert!(!redacted.contains("AIzaSy"));
        assert!(!redacted.contains("sk-abc"));
        assert!(redacted.contains("key=[REDACTED]"));
    }
}
