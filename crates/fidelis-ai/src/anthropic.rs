use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use fidelis_core::ProviderConfig;

use crate::provider::{LlmEnvelope, LlmProvider, ProviderError, ProviderReply, ProviderResult};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
// Published blended rate, used only for budget estimation.
const COST_PER_1K_TOKENS: f64 = 0.009;

/// Anthropic Claude adapter.
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::Auth(
                "Anthropic API key is required. Set LLM_ANTHROPIC_API_KEY.".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client,
        })
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    model: String,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

fn classify_status(status: StatusCode, body: String) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(body),
        s if s.is_server_error() => ProviderError::Server(format!("{}: {}", s, body)),
        s => ProviderError::InvalidRequest(format!("{}: {}", s, body)),
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn hosts_model(&self, model: &str) -> bool {
        model == self.model || model.starts_with("claude-")
    }

    fn estimate_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * COST_PER_1K_TOKENS
    }

    async fn complete(&self, envelope: &LlmEnvelope) -> ProviderResult<ProviderReply> {
        let request = AnthropicRequest {
            model: envelope.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: envelope.max_tokens,
            temperature: envelope.band.temperature(),
            system: envelope.system_prompt.clone(),
            messages: vec![AnthropicMessage {
                role: "user",
                content: envelope.prompt.clone(),
            }],
        };

        let response = self
            .client
            .post(format!("{}/messages", ANTHROPIC_API_BASE))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Server(format!("malformed response body: {}", e)))?;

        let content = parsed
            .content
            .into_iter()
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(ProviderReply {
            content,
            tokens_used: parsed.usage.input_tokens + parsed.usage.output_tokens,
            model: parsed.model,
        })
    }
}
