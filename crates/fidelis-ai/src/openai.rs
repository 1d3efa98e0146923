use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use fidelis_core::ProviderConfig;

use crate::provider::{LlmEnvelope, LlmProvider, ProviderError, ProviderReply, ProviderResult};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const COST_PER_1K_TOKENS: f64 = 0.005;

/// OpenAI chat-completions adapter.
pub struct OpenAiProvider {
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> ProviderResult<Self> {
        if config.api_key.is_empty() {
            return Err(ProviderError::Auth(
                "OpenAI API key is required. Set LLM_OPENAI_API_KEY.".into(),
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
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    model: String,
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn hosts_model(&self, model: &str) -> bool {
        model == self.model || model.starts_with("gpt-") || model.starts_with("o")
    }

    fn estimate_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * COST_PER_1K_TOKENS
    }

    async fn complete(&self, envelope: &LlmEnvelope) -> ProviderResult<ProviderReply> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &envelope.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: envelope.prompt.clone(),
        });

        let request = ChatRequest {
            model: envelope.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: envelope.max_tokens,
            temperature: envelope.band.temperature(),
            messages,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", OPENAI_API_BASE))
            .bearer_auth(&self.api_key)
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
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(body),
                s if s.is_server_error() => ProviderError::Server(format!("{}: {}", s, body)),
                s => ProviderError::InvalidRequest(format!("{}: {}", s, body)),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Server(format!("malformed response body: {}", e)))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(ProviderReply {
            content,
            tokens_used: parsed.usage.total_tokens,
            model: parsed.model,
        })
    }
}
