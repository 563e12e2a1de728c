use async_trait::async_trait;
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
    ("gpt-4o", 0.005, 0.015),
    ("gpt-4o-mini", 0.00015, 0.0006),
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-4", 0.03, 0.06),
    ("gpt-3.5-turbo", 0.001, 0.002),
];

/// OpenAI chat completions client
pub struct OpenAI {
    client: Client,
    api_key: Credentials,
    /// Base URL including `/v1`; also works for compatible servers
    endpoint: String,
}

impl std::fmt::Debug for OpenAI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAI")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key)
            .finish()
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
pub struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl OpenAIRequest {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens,
        }
    }

    pub fn add_message(mut self, role: impl Into<String>, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage {
            role: role.into(),
            content: Some(content.into()),
        });
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// OpenAI status table. An exhausted quota comes back as 429 but will not
/// clear by waiting, so it is treated like a credential problem.
pub(crate) fn classify(status: u16, body: &str) -> FailureKind {
    if status == 429 && body.contains("insufficient_quota") {
        return FailureKind::AuthFailed;
    }
    if status == 400 && body.contains("context_length_exceeded") {
        return FailureKind::InvalidRequest;
    }
    classify_status(status)
}

impl OpenAI {
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
            "https://api.openai.com/v1/chat/completions".to_string()
        } else {
            format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
        }
    }

    /// Send a chat completion request
    pub async fn complete(&self, request: OpenAIRequest) -> Result<OpenAIResponse, ProviderError> {
        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error("OpenAI", &e))?;

        if !response.status().is_success() {
            return Err(error_from_response("OpenAI", response, classify).await);
        }

        response.json::<OpenAIResponse>().await.map_err(|e| {
            ProviderError::new(
                FailureKind::Unknown,
                format!("Failed to parse OpenAI API response: {}", e),
            )
        })
    }

    /// Text of the first choice
    pub fn extract_text_from_response(response: &OpenAIResponse) -> String {
        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provider for OpenAI {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        let request = OpenAIRequest::new(&params.model, params.max_output_tokens)
            .temperature(params.temperature)
            .add_message("system", &prompt.system)
            .add_message("user", &prompt.user);

        let response = self.complete(request).await?;

        if response
            .choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            == Some("content_filter")
        {
            return Err(ProviderError::new(
                FailureKind::InvalidRequest,
                "OpenAI response withheld by content filter",
            ));
        }

        let prompt_tokens = response.usage.as_ref().map(|u| u.prompt_tokens);
        let completion_tokens = response.usage.as_ref().map(|u| u.completion_tokens);

        Ok(Generation {
            text: Self::extract_text_from_response(&response),
            model: response.model.clone().unwrap_or_else(|| params.model.clone()),
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
