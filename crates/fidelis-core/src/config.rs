use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{FidelisError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. "sqlite://data/fidelis.db?mode=rwc".
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/fidelis.db?mode=rwc".into(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub upload_dir: String,
    /// Per-file ceiling in bytes.
    pub max_file_bytes: usize,
    /// Per-bundle ceiling in bytes.
    pub max_bundle_bytes: usize,
    /// Per-bundle artifact count ceiling.
    pub max_file_count: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_dir: "data/uploads".into(),
            max_file_bytes: 10 * 1024 * 1024,
            max_bundle_bytes: 100 * 1024 * 1024,
            max_file_count: 50,
        }
    }
}

/// One configured LLM provider, tried in list order by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider family: "anthropic" or "openai".
    pub kind: String,
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Requests-per-minute bucket.
    pub rpm_limit: u32,
    /// Tokens-per-minute bucket; zero disables token metering.
    #[serde(default)]
    pub tpm_limit: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub providers: Vec<ProviderConfig>,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_cap_ms: u64,
    /// Consecutive failures within the window that open a breaker.
    pub breaker_threshold: u32,
    pub breaker_window_secs: u64,
    pub breaker_open_secs: u64,
    /// Per-session token ceiling.
    pub session_token_budget: u64,
    /// Per-session cost ceiling in USD.
    pub session_cost_budget: f64,
    /// Reformat retries before a JSON-shaped response is given up on.
    pub reformat_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            max_retries: 3,
            backoff_initial_ms: 250,
            backoff_cap_ms: 4_000,
            breaker_threshold: 5,
            breaker_window_secs: 60,
            breaker_open_secs: 30,
            session_token_budget: 500_000,
            session_cost_budget: 10.0,
            reformat_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for cached LLM answers.
    pub llm_ttl_secs: u64,
    /// TTL for cached analyzer outputs.
    pub analysis_ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            llm_ttl_secs: 30 * 24 * 3600,
            analysis_ttl_secs: 7 * 24 * 3600,
            max_entries: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub worker_count: usize,
    pub max_concurrent_sessions: usize,
    pub max_per_tenant: usize,
    /// Hard per-session deadline.
    pub session_deadline_secs: u64,
    /// Grace window after cancellation before a worker is considered wedged.
    pub cancel_grace_secs: u64,
    /// Admission refused above `queue_refuse_factor * worker_count`,
    /// re-enabled below `queue_resume_factor * worker_count`.
    pub queue_refuse_factor: usize,
    pub queue_resume_factor: usize,
    /// Concurrent analyzer invocations per side.
    pub analysis_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 32,
            max_concurrent_sessions: 32,
            max_per_tenant: 8,
            session_deadline_secs: 30 * 60,
            cancel_grace_secs: 30,
            queue_refuse_factor: 4,
            queue_resume_factor: 2,
            analysis_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Undelivered events buffered before a slow subscriber is dropped.
    pub subscriber_buffer: usize,
    /// How long a terminal session's topic stays replayable.
    pub terminal_hold_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 1024,
            terminal_hold_secs: 60,
        }
    }
}

/// Top-level engine configuration. Defaults are overridden by environment
/// variables; secrets only ever come from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FidelisConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| FidelisError::Configuration(format!("invalid value for {}", key))),
        Err(_) => Ok(None),
    }
}

impl FidelisConfig {
    /// Build from defaults, then apply environment overrides. Provider
    /// entries appear in failover order: Anthropic first when both keys
    /// are set.
    pub fn from_env() -> Result<Self> {
        let mut config = FidelisConfig::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(dir) = env::var("UPLOAD_DIR") {
            config.upload.upload_dir = dir;
        }
        if let Some(bytes) = env_parse::<usize>("MAX_FILE_SIZE")? {
            config.upload.max_file_bytes = bytes;
        }
        if let Some(limit) = env_parse::<usize>("ASYNC_CONCURRENCY_LIMIT")? {
            config.scheduler.max_concurrent_sessions = limit;
        }
        if let Some(secs) = env_parse::<u64>("SESSION_DEADLINE_SECONDS")? {
            config.scheduler.session_deadline_secs = secs;
        }
        if let Some(port) = env_parse::<u16>("FIDELIS_PORT")? {
            config.server.port = port;
        }
        if let Ok(host) = env::var("FIDELIS_HOST") {
            config.server.host = host;
        }

        if let Ok(key) = env::var("LLM_ANTHROPIC_API_KEY") {
            config.llm.providers.push(ProviderConfig {
                kind: "anthropic".into(),
                model: env::var("LLM_ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-sonnet-4-20250514".into()),
                api_key: key,
                rpm_limit: 60,
                tpm_limit: 200_000,
                timeout_secs: 120,
            });
        }
        if let Ok(key) = env::var("LLM_OPENAI_API_KEY") {
            config.llm.providers.push(ProviderConfig {
                kind: "openai".into(),
                model: env::var("LLM_OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
                api_key: key,
                rpm_limit: 60,
                tpm_limit: 200_000,
                timeout_secs: 120,
            });
        }

        Ok(config)
    }

    pub fn session_deadline(&self) -> Duration {
        Duration::from_secs(self.scheduler.session_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_ceilings() {
        let config = FidelisConfig::default();
        assert_eq!(config.upload.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.upload.max_bundle_bytes, 100 * 1024 * 1024);
        assert_eq!(config.upload.max_file_count, 50);
        assert_eq!(config.scheduler.worker_count, 32);
        assert_eq!(config.scheduler.max_per_tenant, 8);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.llm.backoff_initial_ms, 250);
        assert_eq!(config.llm.backoff_cap_ms, 4_000);
        assert_eq!(config.cache.llm_ttl_secs, 30 * 24 * 3600);
        assert_eq!(config.cache.analysis_ttl_secs, 7 * 24 * 3600);
    }
}
