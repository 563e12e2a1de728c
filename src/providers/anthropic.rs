use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    Generation, GenerationParams, PricingTable, Provider, Usage, build_http_client,
    classify_status, classify_transport_error, error_from_response, estimate_cost,
};
use crate::app_config::{Credentials, ProviderKind};
use crate::errors::{FailureKind, ProviderError};
use crate::translation::prompts::Prompt;

/// USD per 1K tokens
const PRICING: PricingTable = &[
    ("claude-3-5-sonnet-20241022", 0.003, 0.015),
    ("claude-3-5-haiku-20241022", 0.00025, 0.00125),
    ("claude-3-opus-20240229", 0.015, 0.075),
    ("claude-3-sonnet-20240229", 0.003, 0.015),
    ("claude-3-haiku-20240307", 0.00025, 0.00125),
];

/// Anthropic client for interacting with Anthropic API
pub struct Anthropic {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: Credentials,
    /// API endpoint URL (optional, defaults to public API)
    endpoint: String,
}

impl std::fmt::Debug for Anthropic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anthropic")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key)
            .finish()
    }
}

/// Anthropic message request
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// The model to use
    model: String,

    /// The messages for the conversation
    messages: Vec<AnthropicMessage>,

    /// System prompt to guide the AI
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,

    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,

    /// Maximum number of tokens to generate
    max_tokens: u32,
}

/// Anthropic message format
#[derive(Debug, Serialize, Deserialize)]
pub struct AnthropicMessage {
    /// Role of the message sender (user, assistant)
    pub role: String,

    /// Content of the message
    pub content: String,
}

/// Token usage information
#[derive(Debug, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    /// The content of the response
    pub content: Vec<AnthropicContent>,
    /// Model that served the request
    #[serde(default)]
    pub model: Option<String>,
    /// Why generation stopped (`end_turn`, `max_tokens`, ...)
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage information
    pub usage: TokenUsage,
}

/// Individual content block in an Anthropic response
#[derive(Debug, Deserialize)]
pub struct AnthropicContent {
    /// The type of content
    #[serde(rename = "type")]
    pub content_type: String,

    /// The actual text content
    #[serde(default)]
    pub text: String,
}

impl AnthropicRequest {
    /// Create a new Anthropic request
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            system: None,
            temperature: None,
            max_tokens,
        }
    }

    /// Add a message to the request
    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(AnthropicMessage {
            role: role.into(),
            content: content.into(),
        });
        self
    }

    /// Set the system prompt
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Anthropic status table. 529 is their "overloaded" code.
pub(crate) fn classify(status: u16, body: &str) -> FailureKind {
    if status == 400 && body.contains("credit balance") {
        return FailureKind::AuthFailed;
    }
    classify_status(status)
}

impl Anthropic {
    /// Create a new Anthropic client
    pub fn new(
        api_key: Credentials,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            endpoint: endpoint.to_string(),
        })
    }

    fn api_url(&self) -> String {
        if self.endpoint.is_empty() {
            "https://api.anthropic.com/v1/messages".to_string()
        } else {
            format!("{}/v1/messages", self.endpoint.trim_end_matches('/'))
        }
    }

    /// Complete a messages request
    pub async fn complete(
        &self,
        request: AnthropicRequest,
    ) -> Result<AnthropicResponse, ProviderError> {
        let response = self
            .client
            .post(self.api_url())
            .header("Content-Type", "application/json")
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error("Anthropic", &e))?;

        if !response.status().is_success() {
            return Err(error_from_response("Anthropic", response, classify).await);
        }

        response.json::<AnthropicResponse>().await.map_err(|e| {
            ProviderError::new(
                FailureKind::Unknown,
                format!("Failed to parse Anthropic API response: {}", e),
            )
        })
    }

    /// Extract text from Anthropic response
    pub fn extract_text_from_response(response: &AnthropicResponse) -> String {
        response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text.as_str())
            .collect()
    }
}

#[async_trait]
impl Provider for Anthropic {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        let request = AnthropicRequest::new(&params.model, params.max_output_tokens)
            .system(&prompt.system)
            .temperature(params.temperature)
            .add_message("user", &prompt.user);

        let response = self.complete(request).await?;
        if response.stop_reason.as_deref() == Some("max_tokens") {
            debug!("Anthropic response hit max_tokens for model {}", params.model);
        }

        let prompt_tokens = Some(response.usage.input_tokens);
        let completion_tokens = Some(response.usage.output_tokens);

        Ok(Generation {
            text: Self::extract_text_from_response(&response),
            model: response.model.unwrap_or_else(|| params.model.clone()),
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                characters: prompt.characters(),
                estimated_cost_usd: estimate_cost(
                    PRICING,
                    &params.model,
                    prompt_tokens,
                    completion_tokens,
                ),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_withOverloaded_shouldBeServiceUnavailable() {
        assert_eq!(classify(529, ""), FailureKind::ServiceUnavailable);
        assert_eq!(classify(401, ""), FailureKind::AuthFailed);
        assert_eq!(
            classify(400, r#"{"error":{"message":"Your credit balance is too low"}}"#),
            FailureKind::AuthFailed
        );
        assert_eq!(classify(400, "bad"), FailureKind::InvalidRequest);
    }

    #[test]
    fn test_extractText_shouldJoinTextBlocks() {
        let response: AnthropicResponse = serde_json::from_str(
            r#"{
                "content": [
                    {"type": "text", "text": "Hello "},
                    {"type": "tool_use"},
                    {"type": "text", "text": "world"}
                ],
                "usage": {"input_tokens": 3, "output_tokens": 2}
            }"#,
        )
        .unwrap();

        assert_eq!(Anthropic::extract_text_from_response(&response), "Hello world");
    }

    #[test]
    fn test_request_shouldSerializeSystemSeparately() {
        let request = AnthropicRequest::new("claude-3-5-haiku-20241022", 100)
            .system("sys")
            .add_message("user", "hi");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["system"], "sys");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json.get("temperature").is_none());
    }
}
