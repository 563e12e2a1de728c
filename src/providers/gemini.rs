use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    Generation, GenerationParams, Provider, Usage, build_http_client, classify_status,
    classify_transport_error, error_from_response,
};
use crate::app_config::{Credentials, ProviderKind};
use crate::errors::{FailureKind, ProviderError};
use crate::translation::prompts::Prompt;

/// Google Generative Language API client
pub struct Gemini {
    client: Client,
    api_key: Credentials,
    endpoint: String,
}

impl std::fmt::Debug for Gemini {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gemini")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key)
            .finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: Option<u64>,
    #[serde(default)]
    pub candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GeminiRequest {
    pub fn new(prompt: &Prompt, params: &GenerationParams) -> Self {
        let system_instruction = (!prompt.system.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: prompt.system.clone(),
            }],
        });

        Self {
            system_instruction,
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.user.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_output_tokens,
            },
        }
    }
}

/// Gemini status table. An invalid key comes back as 400.
pub(crate) fn classify(status: u16, body: &str) -> FailureKind {
    if status == 400 && (body.contains("API_KEY_INVALID") || body.contains("API key not valid")) {
        return FailureKind::AuthFailed;
    }
    classify_status(status)
}

impl Gemini {
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

    fn api_url(&self, model: &str) -> String {
        let base = if self.endpoint.is_empty() {
            "https://generativelanguage.googleapis.com/v1beta"
        } else {
            self.endpoint.trim_end_matches('/')
        };
        format!("{}/models/{}:generateContent", base, model)
    }

    pub async fn complete(
        &self,
        model: &str,
        request: GeminiRequest,
    ) -> Result<GeminiResponse, ProviderError> {
        let response = self
            .client
            .post(self.api_url(model))
            .header("x-goog-api-key", self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error("Gemini", &e))?;

        if !response.status().is_success() {
            return Err(error_from_response("Gemini", response, classify).await);
        }

        response.json::<GeminiResponse>().await.map_err(|e| {
            ProviderError::new(
                FailureKind::Unknown,
                format!("Failed to parse Gemini API response: {}", e),
            )
        })
    }

    /// Text of the first candidate, or the reason there is none
    pub fn extract_text_from_response(response: &GeminiResponse) -> Result<String, ProviderError> {
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ProviderError::new(
                FailureKind::InvalidRequest,
                format!("Gemini blocked the prompt: {}", reason),
            ));
        }

        let candidate = response.candidates.first().ok_or_else(|| {
            ProviderError::new(FailureKind::Unknown, "Gemini returned no candidates")
        })?;

        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(ProviderError::new(
                FailureKind::InvalidRequest,
                "Gemini withheld the response for safety reasons",
            ));
        }

        Ok(candidate
            .content
            .as_ref()
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Provider for Gemini {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        let response = self
            .complete(&params.model, GeminiRequest::new(prompt, params))
            .await?;
        let text = Self::extract_text_from_response(&response)?;
        let usage = response.usage_metadata.as_ref();

        Ok(Generation {
            text,
            model: response
                .model_version
                .clone()
                .unwrap_or_else(|| params.model.clone()),
            usage: Usage {
                prompt_tokens: usage.and_then(|u| u.prompt_token_count),
                completion_tokens: usage.and_then(|u| u.candidates_token_count),
                characters: prompt.characters(),
                // no published per-token pricing for the free tier models
                estimated_cost_usd: None,
            },
        })
    }
}
