use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

use fidelis_core::TemperatureBand;

/// Request unit handed to the dispatcher by pipeline stages.
#[derive(Debug, Clone)]
pub struct LlmEnvelope {
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// Pinned model; when set, only providers hosting it are tried.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub band: TemperatureBand,
    /// Structured context, canonicalized by the map's key ordering.
    pub context: BTreeMap<String, String>,
    /// Hard deadline derived from the session budget.
    pub deadline: Instant,
    /// Session the call is accounted against, when any.
    pub session_id: Option<String>,
}

impl LlmEnvelope {
    pub fn new(prompt: impl Into<String>, band: TemperatureBand, deadline: Instant) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            model: None,
            max_tokens: 4096,
            band,
            context: BTreeMap::new(),
            deadline,
            session_id: None,
        }
    }

    pub fn system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn canonical_context(&self) -> String {
        serde_json::to_string(&self.context).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Response unit returned by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmReply {
    pub content: String,
    pub tokens_used: u64,
    pub estimated_cost: f64,
    pub latency_ms: u64,
    pub provider: String,
    pub model: String,
    pub cache_hit: bool,
    /// Providers skipped on the way to a successful dispatch.
    #[serde(default)]
    pub failovers: Vec<String>,
}

/// Raw completion from one provider adapter.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub content: String,
    pub tokens_used: u64,
    pub model: String,
}

/// Errors a provider adapter can signal. Recoverable errors move the
/// dispatcher on to the next provider; the rest fail the call immediately.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by provider")]
    RateLimited,

    #[error("server error: {0}")]
    Server(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::RateLimited
                | ProviderError::Server(_)
                | ProviderError::Network(_)
        )
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// One LLM provider adapter: send a prompt, return a completion.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Whether this provider hosts a given (pinned) model.
    fn hosts_model(&self, model: &str) -> bool {
        self.model() == model
    }

    /// Estimated USD cost for a number of tokens.
    fn estimate_cost(&self, tokens: u64) -> f64;

    async fn complete(&self, envelope: &LlmEnvelope) -> ProviderResult<ProviderReply>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(ProviderError::Timeout.is_recoverable());
        assert!(ProviderError::RateLimited.is_recoverable());
        assert!(ProviderError::Server("500".into()).is_recoverable());
        assert!(!ProviderError::Auth("bad key".into()).is_recoverable());
        assert!(!ProviderError::InvalidRequest("422".into()).is_recoverable());
    }

    #[test]
    fn canonical_context_is_key_sorted() {
        let mut envelope = LlmEnvelope::new("p", TemperatureBand::Low, Instant::now());
        envelope.context.insert("zeta".into(), "1".into());
        envelope.context.insert("alpha".into(), "2".into());
        assert_eq!(envelope.canonical_context(), r#"{"alpha":"2","zeta":"1"}"#);
    }
}
