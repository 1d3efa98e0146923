use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use fidelis_core::{CacheConfig, Fingerprint, Result};

use crate::singleflight::SingleFlight;

/// Cache namespaces, so invalidations can be targeted. Each namespace
/// carries its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Llm,
    Analysis,
}

impl Namespace {
    pub fn prefix(&self) -> &'static str {
        match self {
            Namespace::Llm => "llm:",
            Namespace::Analysis => "analysis:",
        }
    }

    fn default_ttl(&self, config: &CacheConfig) -> Duration {
        match self {
            Namespace::Llm => Duration::from_secs(config.llm_ttl_secs),
            Namespace::Analysis => Duration::from_secs(config.analysis_ttl_secs),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Cache hit/miss statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

/// Storage backend behind the cache. The in-memory implementation is the
/// default; a distributed store slots in behind the same interface.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn len(&self) -> Result<usize>;
}

/// In-process backend: concurrent readers, writes keyed per entry.
pub struct MemoryBackend {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    fn evict_if_full(&self) {
        if self.entries.len() < self.max_entries {
            return;
        }
        self.entries.retain(|_, entry| !entry.is_expired());
        if self.entries.len() < self.max_entries {
            return;
        }
        // Still full after expiry sweep: drop the oldest entry.
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().created_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                drop(self.entries.remove(key));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.evict_if_full();
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

/// Process-wide fingerprint cache. A backend error downgrades to a miss
/// and is logged at warn; it never blocks the pipeline.
pub struct FingerprintCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    flight: SingleFlight<Value>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FingerprintCache {
    pub fn new(config: CacheConfig) -> Self {
        let backend = Arc::new(MemoryBackend::new(config.max_entries));
        Self::with_backend(backend, config)
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            flight: SingleFlight::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn key(namespace: Namespace, fingerprint: &Fingerprint) -> String {
        format!("{}{}", namespace.prefix(), fingerprint)
    }

    pub async fn get(&self, namespace: Namespace, fingerprint: &Fingerprint) -> Option<Value> {
        let key = Self::key(namespace, fingerprint);
        match self.backend.get(&key).await {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                warn!(key = %key, error = %err, "cache backend read failed, treating as miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, namespace: Namespace, fingerprint: &Fingerprint, value: Value) {
        let key = Self::key(namespace, fingerprint);
        let ttl = namespace.default_ttl(&self.config);
        if let Err(err) = self.backend.put(&key, value, ttl).await {
            warn!(key = %key, error = %err, "cache backend write failed, entry dropped");
        }
    }

    /// Single-flight read-through: concurrent misses on the same key
    /// converge on one computation; later arrivals block on the first and
    /// read its result.
    pub async fn get_or_compute<F, Fut>(
        &self,
        namespace: Namespace,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Value>> + Send,
    {
        if let Some(value) = self.get(namespace, fingerprint).await {
            return Ok(value);
        }
        let key = Self::key(namespace, fingerprint);
        self.flight
            .run(&key, || async {
                // Re-check under the flight: a racing leader may have
                // filled the entry between our miss and our admission.
                if let Some(value) = self.get(namespace, fingerprint).await {
                    return Ok(value);
                }
                let value = compute().await?;
                self.put(namespace, fingerprint, value.clone()).await;
                Ok(value)
            })
            .await
    }

    pub async fn invalidate(&self, namespace: Namespace, fingerprint: &Fingerprint) {
        let key = Self::key(namespace, fingerprint);
        if let Err(err) = self.backend.remove(&key).await {
            warn!(key = %key, error = %err, "cache invalidation failed");
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.backend.len().await.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_core::Language;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn fp(content: &str) -> Fingerprint {
        Fingerprint::for_file("t.py", &Language::Python, content.as_bytes())
    }

    fn cache() -> FingerprintCache {
        FingerprintCache::new(CacheConfig::default())
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let cache = cache();
        let fingerprint = fp("a");
        cache
            .put(Namespace::Llm, &fingerprint, json!({"answer": 42}))
            .await;
        let hit = cache.get(Namespace::Llm, &fingerprint).await.unwrap();
        assert_eq!(hit["answer"], 42);
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let cache = cache();
        let fingerprint = fp("a");
        cache.put(Namespace::Llm, &fingerprint, json!(1)).await;
        assert!(cache.get(Namespace::Analysis, &fingerprint).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_misses_compute_once() {
        let cache = Arc::new(cache());
        let fingerprint = fp("burst");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let fingerprint = fingerprint.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(Namespace::Llm, &fingerprint, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(json!("computed"))
                    })
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), json!("computed"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_read_as_miss() {
        let config = CacheConfig {
            llm_ttl_secs: 0,
            ..CacheConfig::default()
        };
        let cache = FingerprintCache::new(config);
        let fingerprint = fp("ttl");
        cache.put(Namespace::Llm, &fingerprint, json!(1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get(Namespace::Llm, &fingerprint).await.is_none());
    }

    #[tokio::test]
    async fn full_cache_evicts_oldest() {
        let config = CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        };
        let cache = FingerprintCache::new(config);
        let first = fp("1");
        cache.put(Namespace::Llm, &first, json!(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.put(Namespace::Llm, &fp("2"), json!(2)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.put(Namespace::Llm, &fp("3"), json!(3)).await;
        assert!(cache.get(Namespace::Llm, &first).await.is_none());
        assert!(cache.stats().await.entries <= 2);
    }
}
