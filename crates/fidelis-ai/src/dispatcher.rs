use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use fidelis_cache::{FingerprintCache, Namespace, SingleFlight};
use fidelis_core::{FidelisError, Fingerprint, LlmConfig, Result};

use crate::anthropic::AnthropicProvider;
use crate::breaker::CircuitBreaker;
use crate::budget::{BudgetLedger, SpendSnapshot};
use crate::openai::OpenAiProvider;
use crate::provider::{LlmEnvelope, LlmProvider, LlmReply, ProviderError};
use crate::ratelimit::{estimate_tokens, LimitWait, ProviderLimiter};

struct ProviderSlot {
    provider: Arc<dyn LlmProvider>,
    limiter: ProviderLimiter,
    breaker: CircuitBreaker,
}

/// Schedules LLM calls across an ordered provider list with failover,
/// rate caps, retries, circuit breaking, budget accounting and a cached
/// path for low-temperature requests.
pub struct Dispatcher {
    slots: Vec<ProviderSlot>,
    budget: BudgetLedger,
    cache: Arc<FingerprintCache>,
    flight: SingleFlight<LlmReply>,
    config: LlmConfig,
}

impl Dispatcher {
    /// Build provider adapters from configuration, in failover order.
    /// Providers that fail to initialize are skipped with a warning.
    pub fn from_config(config: &LlmConfig, cache: Arc<FingerprintCache>) -> Self {
        let mut providers: Vec<Arc<dyn LlmProvider>> = Vec::new();
        for provider_config in &config.providers {
            let built: std::result::Result<Arc<dyn LlmProvider>, ProviderError> =
                match provider_config.kind.as_str() {
                    "anthropic" => {
                        AnthropicProvider::new(provider_config).map(|p| Arc::new(p) as _)
                    }
                    "openai" => OpenAiProvider::new(provider_config).map(|p| Arc::new(p) as _),
                    other => Err(ProviderError::InvalidRequest(format!(
                        "unsupported provider kind: {}",
                        other
                    ))),
                };
            match built {
                Ok(provider) => providers.push(provider),
                Err(err) => {
                    warn!(kind = %provider_config.kind, error = %err, "skipping provider");
                }
            }
        }
        Self::with_providers(providers, config.clone(), cache)
    }

    pub fn with_providers(
        providers: Vec<Arc<dyn LlmProvider>>,
        config: LlmConfig,
        cache: Arc<FingerprintCache>,
    ) -> Self {
        let slots = providers
            .into_iter()
            .enumerate()
            .map(|(i, provider)| {
                let provider_config = config.providers.get(i);
                let rpm = provider_config.map(|c| c.rpm_limit).unwrap_or(600);
                let tpm = provider_config.map(|c| c.tpm_limit).unwrap_or(0);
                ProviderSlot {
                    provider,
                    limiter: ProviderLimiter::new(rpm, tpm),
                    breaker: CircuitBreaker::new(
                        config.breaker_threshold,
                        Duration::from_secs(config.breaker_window_secs),
                        Duration::from_secs(config.breaker_open_secs),
                    ),
                }
            })
            .collect();
        Self {
            slots,
            budget: BudgetLedger::new(config.session_token_budget, config.session_cost_budget),
            cache,
            flight: SingleFlight::new(),
            config,
        }
    }

    pub fn provider_count(&self) -> usize {
        self.slots.len()
    }

    pub fn spend(&self, session_id: &str) -> SpendSnapshot {
        self.budget.snapshot(session_id)
    }

    pub fn forget_session(&self, session_id: &str) {
        self.budget.forget(session_id);
    }

    fn fingerprint(&self, envelope: &LlmEnvelope) -> Fingerprint {
        Fingerprint::for_llm(
            envelope.model.as_deref().unwrap_or("auto"),
            envelope.system_prompt.as_deref().unwrap_or(""),
            &envelope.prompt,
            &envelope.canonical_context(),
            envelope.band,
        )
    }

    /// Dispatch one envelope. Low-band requests go through the cache;
    /// identical concurrent requests converge on one dispatch.
    pub async fn ask(&self, envelope: &LlmEnvelope) -> Result<LlmReply> {
        if let Some(session_id) = &envelope.session_id {
            self.budget.check(session_id)?;
        }
        let fingerprint = self.fingerprint(envelope);

        if envelope.band.cacheable() {
            if let Some(value) = self.cache.get(Namespace::Llm, &fingerprint).await {
                let mut reply: LlmReply = serde_json::from_value(value)?;
                reply.cache_hit = true;
                return Ok(reply);
            }
            let value = self
                .cache
                .get_or_compute(Namespace::Llm, &fingerprint, || async {
                    let reply = self.dispatch(envelope).await?;
                    Ok(serde_json::to_value(&reply)?)
                })
                .await?;
            return Ok(serde_json::from_value(value)?);
        }

        self.flight
            .run(fingerprint.as_str(), || self.dispatch(envelope))
            .await
    }

    /// Dispatch with an asserted JSON shape: the reply content must parse
    /// as JSON, with a bounded number of reformat retries.
    pub async fn ask_json(&self, envelope: &LlmEnvelope) -> Result<(Value, LlmReply)> {
        let mut attempt_envelope = envelope.clone();
        for attempt in 0..=self.config.reformat_retries {
            let reply = self.ask(&attempt_envelope).await?;
            match extract_json(&reply.content) {
                Some(value) => return Ok((value, reply)),
                None if attempt < self.config.reformat_retries => {
                    warn!(attempt, "model response was not valid JSON, asking for a reformat");
                    attempt_envelope = envelope.clone();
                    attempt_envelope.prompt = format!(
                        "{}\n\nYour previous answer was not valid JSON. Respond with only a \
                         single valid JSON value, no prose and no code fences.\nPrevious answer:\n{}",
                        envelope.prompt, reply.content
                    );
                }
                None => {}
            }
        }
        Err(FidelisError::ResponseUnparseable(format!(
            "no valid JSON after {} reformat retries",
            self.config.reformat_retries
        )))
    }

    async fn dispatch(&self, envelope: &LlmEnvelope) -> Result<LlmReply> {
        if self.slots.is_empty() {
            return Err(FidelisError::ProviderUnavailable(
                "no providers configured".into(),
            ));
        }

        let token_estimate = estimate_tokens(envelope.prompt.len(), envelope.max_tokens);
        let mut failovers: Vec<String> = Vec::new();
        let mut last_error: Option<String> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                self.backoff(attempt, envelope.deadline).await?;
            }
            let mut candidates = 0usize;

            for slot in &self.slots {
                if Instant::now() >= envelope.deadline {
                    return Err(FidelisError::DeadlineExceeded(
                        "dispatch deadline reached".into(),
                    ));
                }
                if let Some(pinned) = &envelope.model {
                    if !slot.provider.hosts_model(pinned) {
                        continue;
                    }
                }
                candidates += 1;

                if !slot.breaker.try_acquire() {
                    // Open breaker: provider is not consulted at all.
                    continue;
                }

                if slot.limiter.acquire(token_estimate, envelope.deadline).await
                    == LimitWait::DeadlineFirst
                {
                    last_error = Some(format!("{}: rate-limit wait past deadline", slot.provider.name()));
                    failovers.push(slot.provider.name().to_string());
                    continue;
                }

                let remaining = envelope.deadline.saturating_duration_since(Instant::now());
                let started = Instant::now();
                let outcome =
                    tokio::time::timeout(remaining, slot.provider.complete(envelope)).await;

                match outcome {
                    Ok(Ok(provider_reply)) => {
                        slot.breaker.record_success();
                        let cost = slot.provider.estimate_cost(provider_reply.tokens_used);
                        if let Some(session_id) = &envelope.session_id {
                            self.budget
                                .record(session_id, provider_reply.tokens_used, cost);
                        }
                        if !failovers.is_empty() {
                            info!(
                                provider = slot.provider.name(),
                                skipped = ?failovers,
                                "provider-failover"
                            );
                        }
                        return Ok(LlmReply {
                            content: provider_reply.content,
                            tokens_used: provider_reply.tokens_used,
                            estimated_cost: cost,
                            latency_ms: started.elapsed().as_millis() as u64,
                            provider: slot.provider.name().to_string(),
                            model: provider_reply.model,
                            cache_hit: false,
                            failovers,
                        });
                    }
                    Ok(Err(err)) if err.is_recoverable() => {
                        slot.breaker.record_failure();
                        warn!(provider = slot.provider.name(), error = %err, "provider call failed, trying next");
                        last_error = Some(format!("{}: {}", slot.provider.name(), err));
                        failovers.push(slot.provider.name().to_string());
                    }
                    Ok(Err(err)) => {
                        // Authentication and plain 4xx fail the call
                        // immediately; retrying cannot help.
                        return Err(match err {
                            ProviderError::Auth(msg) => FidelisError::ProviderUnavailable(
                                format!("{}: {}", slot.provider.name(), msg),
                            ),
                            other => FidelisError::Internal(format!(
                                "{}: {}",
                                slot.provider.name(),
                                other
                            )),
                        });
                    }
                    Err(_) => {
                        slot.breaker.record_failure();
                        last_error = Some(format!("{}: deadline during call", slot.provider.name()));
                        failovers.push(slot.provider.name().to_string());
                    }
                }
            }

            if candidates == 0 {
                return Err(FidelisError::ProviderUnavailable(format!(
                    "no provider hosts model {:?}",
                    envelope.model
                )));
            }
        }

        Err(FidelisError::ProviderUnavailable(format!(
            "all providers failed; last error: {}",
            last_error.unwrap_or_else(|| "all breakers open".into())
        )))
    }

    /// Exponential backoff starting at 250 ms, capped at 4 s, full jitter.
    async fn backoff(&self, attempt: u32, deadline: Instant) -> Result<()> {
        let exp = self
            .config
            .backoff_initial_ms
            .saturating_mul(1u64 << (attempt - 1).min(16))
            .min(self.config.backoff_cap_ms);
        let jittered = rand::thread_rng().gen_range(0..=exp);
        let delay = Duration::from_millis(jittered);
        if Instant::now() + delay >= deadline {
            return Err(FidelisError::DeadlineExceeded(
                "backoff would exceed deadline".into(),
            ));
        }
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Pull a JSON value out of model output: direct parse first, then a
/// fenced block, then the widest brace-delimited slice.
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(value) = serde_json::from_str(after[..end].trim()) {
                return Some(value);
            }
        }
    }
    let open = trimmed.find(['{', '['])?;
    let close = trimmed.rfind(['}', ']'])?;
    if close > open {
        serde_json::from_str(trimmed[open..=close].trim()).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderReply, ProviderResult};
    use async_trait::async_trait;
    use fidelis_core::{CacheConfig, TemperatureBand};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted provider: pops one outcome per call, repeats the last.
    struct MockProvider {
        name: String,
        script: Mutex<Vec<ProviderResult<ProviderReply>>>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        fn new(name: &str, script: Vec<ProviderResult<ProviderReply>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            })
        }

        fn ok(content: &str) -> ProviderResult<ProviderReply> {
            Ok(ProviderReply {
                content: content.to_string(),
                tokens_used: 100,
                model: "mock-model".to_string(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn model(&self) -> &str {
            "mock-model"
        }

        fn estimate_cost(&self, tokens: u64) -> f64 {
            tokens as f64 * 1e-5
        }

        async fn complete(&self, _envelope: &LlmEnvelope) -> ProviderResult<ProviderReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.remove(0)
            } else {
                match script.first() {
                    Some(Ok(reply)) => Ok(ProviderReply {
                        content: reply.content.clone(),
                        tokens_used: reply.tokens_used,
                        model: reply.model.clone(),
                    }),
                    Some(Err(err)) => Err(clone_error(err)),
                    None => Err(ProviderError::Server("script exhausted".into())),
                }
            }
        }
    }

    fn clone_error(err: &ProviderError) -> ProviderError {
        match err {
            ProviderError::Timeout => ProviderError::Timeout,
            ProviderError::RateLimited => ProviderError::RateLimited,
            ProviderError::Server(m) => ProviderError::Server(m.clone()),
            ProviderError::Network(m) => ProviderError::Network(m.clone()),
            ProviderError::Auth(m) => ProviderError::Auth(m.clone()),
            ProviderError::InvalidRequest(m) => ProviderError::InvalidRequest(m.clone()),
        }
    }

    fn dispatcher_with(providers: Vec<Arc<dyn LlmProvider>>, config: LlmConfig) -> Dispatcher {
        let cache = Arc::new(FingerprintCache::new(CacheConfig::default()));
        Dispatcher::with_providers(providers, config, cache)
    }

    fn envelope(band: TemperatureBand) -> LlmEnvelope {
        LlmEnvelope::new("compare these", band, Instant::now() + Duration::from_secs(5))
    }

    fn fast_config() -> LlmConfig {
        LlmConfig {
            max_retries: 1,
            backoff_initial_ms: 1,
            backoff_cap_ms: 2,
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn failover_reaches_secondary() {
        let primary = MockProvider::new("primary", vec![Err(ProviderError::Server("500".into()))]);
        let secondary = MockProvider::new("secondary", vec![MockProvider::ok("answer")]);
        let dispatcher = dispatcher_with(
            vec![
                primary.clone() as Arc<dyn LlmProvider>,
                secondary.clone() as Arc<dyn LlmProvider>,
            ],
            fast_config(),
        );

        let reply = dispatcher.ask(&envelope(TemperatureBand::Medium)).await.unwrap();
        assert_eq!(reply.provider, "secondary");
        assert_eq!(reply.content, "answer");
        assert_eq!(reply.failovers, vec!["primary".to_string()]);
    }

    #[tokio::test]
    async fn open_breaker_is_not_consulted() {
        let primary = MockProvider::new("primary", vec![Err(ProviderError::Server("500".into()))]);
        let secondary = MockProvider::new("secondary", vec![MockProvider::ok("ok")]);
        let mut config = fast_config();
        config.breaker_threshold = 5;
        config.breaker_open_secs = 60;
        let dispatcher = dispatcher_with(
            vec![
                primary.clone() as Arc<dyn LlmProvider>,
                secondary.clone() as Arc<dyn LlmProvider>,
            ],
            config,
        );

        // Five failing calls open the primary's breaker.
        for _ in 0..5 {
            let reply = dispatcher.ask(&envelope(TemperatureBand::Medium)).await.unwrap();
            assert_eq!(reply.provider, "secondary");
        }
        let calls_when_open = primary.calls();
        assert!(calls_when_open >= 5);

        // Further traffic goes straight to the secondary.
        for _ in 0..3 {
            let reply = dispatcher.ask(&envelope(TemperatureBand::Medium)).await.unwrap();
            assert_eq!(reply.provider, "secondary");
        }
        assert_eq!(primary.calls(), calls_when_open);
    }

    #[tokio::test]
    async fn auth_error_fails_immediately() {
        let primary = MockProvider::new("primary", vec![Err(ProviderError::Auth("bad key".into()))]);
        let secondary = MockProvider::new("secondary", vec![MockProvider::ok("ok")]);
        let dispatcher = dispatcher_with(
            vec![
                primary as Arc<dyn LlmProvider>,
                secondary.clone() as Arc<dyn LlmProvider>,
            ],
            fast_config(),
        );

        let err = dispatcher
            .ask(&envelope(TemperatureBand::Medium))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "provider-unavailable");
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn low_band_hits_cache_on_repeat() {
        let provider = MockProvider::new("primary", vec![MockProvider::ok("cached answer")]);
        let dispatcher = dispatcher_with(vec![provider.clone() as Arc<dyn LlmProvider>], fast_config());

        let first = dispatcher.ask(&envelope(TemperatureBand::Low)).await.unwrap();
        assert!(!first.cache_hit);
        let second = dispatcher.ask(&envelope(TemperatureBand::Low)).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.content, "cached answer");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn high_band_skips_cache() {
        let provider = MockProvider::new("primary", vec![MockProvider::ok("a")]);
        let dispatcher = dispatcher_with(vec![provider.clone() as Arc<dyn LlmProvider>], fast_config());

        dispatcher.ask(&envelope(TemperatureBand::High)).await.unwrap();
        dispatcher.ask(&envelope(TemperatureBand::High)).await.unwrap();
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn budget_ceiling_fails_subsequent_calls() {
        let provider = MockProvider::new("primary", vec![MockProvider::ok("a")]);
        let mut config = fast_config();
        config.session_token_budget = 100;
        let dispatcher = dispatcher_with(vec![provider as Arc<dyn LlmProvider>], config);

        let mut first = envelope(TemperatureBand::Medium);
        first.session_id = Some("sess".into());
        dispatcher.ask(&first).await.unwrap();

        let mut second = envelope(TemperatureBand::Medium);
        second.prompt = "another prompt".into();
        second.session_id = Some("sess".into());
        let err = dispatcher.ask(&second).await.unwrap_err();
        assert_eq!(err.code(), "budget-exhausted");
    }

    #[tokio::test]
    async fn expired_deadline_is_rejected() {
        let provider = MockProvider::new("primary", vec![MockProvider::ok("a")]);
        let dispatcher = dispatcher_with(vec![provider as Arc<dyn LlmProvider>], fast_config());
        let mut request = envelope(TemperatureBand::Medium);
        request.deadline = Instant::now() - Duration::from_millis(1);
        let err = dispatcher.ask(&request).await.unwrap_err();
        assert_eq!(err.code(), "deadline-exceeded");
    }

    #[tokio::test]
    async fn ask_json_reformats_then_parses() {
        let provider = MockProvider::new(
            "primary",
            vec![
                MockProvider::ok("definitely not json"),
                MockProvider::ok(r#"{"pairs": []}"#),
            ],
        );
        let dispatcher = dispatcher_with(vec![provider.clone() as Arc<dyn LlmProvider>], fast_config());
        let (value, _reply) = dispatcher
            .ask_json(&envelope(TemperatureBand::Medium))
            .await
            .unwrap();
        assert!(value["pairs"].is_array());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn ask_json_gives_up_with_unparseable() {
        let provider = MockProvider::new("primary", vec![MockProvider::ok("still not json")]);
        let dispatcher = dispatcher_with(vec![provider as Arc<dyn LlmProvider>], fast_config());
        let err = dispatcher
            .ask_json(&envelope(TemperatureBand::Medium))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "response-unparseable");
    }

    #[test]
    fn json_extraction_handles_fences_and_prose() {
        assert!(extract_json(r#"{"a":1}"#).is_some());
        assert!(extract_json("```json\n{\"a\":1}\n```").is_some());
        assert!(extract_json("Here you go: {\"a\": 1} hope that helps").is_some());
        assert!(extract_json("no structure here").is_none());
    }
}
