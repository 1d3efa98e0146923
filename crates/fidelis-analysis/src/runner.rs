use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

use fidelis_cache::{FingerprintCache, Namespace};
use fidelis_core::{
    FidelisError, InputBundle, LogLevel, Representation, Result, SessionLogEntry, Side,
    ValidationScope,
};

use crate::registry::AnalyzerRegistry;

/// What one side's analysis produced: the merged representation plus the
/// log entries the stage wants attached to the session.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub representation: Representation,
    pub logs: Vec<SessionLogEntry>,
}

/// Runs the analysis stage: partitions a bundle by artifact kind, consults
/// the analysis cache per artifact, fans out to analyzer adapters with
/// bounded parallelism and merges partial representations in input order.
pub struct AnalysisStageRunner {
    registry: Arc<AnalyzerRegistry>,
    cache: Arc<FingerprintCache>,
    concurrency: usize,
}

enum ArtifactResult {
    Extracted(Representation),
    Failed { artifact: String, message: String },
}

impl AnalysisStageRunner {
    pub fn new(
        registry: Arc<AnalyzerRegistry>,
        cache: Arc<FingerprintCache>,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            cache,
            concurrency: concurrency.max(1),
        }
    }

    /// Source and target are analyzed in parallel.
    pub async fn analyze_both(
        &self,
        source: &InputBundle,
        target: &InputBundle,
        scope: ValidationScope,
    ) -> Result<(AnalysisOutcome, AnalysisOutcome)> {
        let (source_outcome, target_outcome) = tokio::join!(
            self.analyze(Side::Source, source, scope),
            self.analyze(Side::Target, target, scope),
        );
        Ok((source_outcome?, target_outcome?))
    }

    pub async fn analyze(
        &self,
        side: Side,
        bundle: &InputBundle,
        scope: ValidationScope,
    ) -> Result<AnalysisOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let scope_key = scope.to_string();

        let file_futures = bundle.files.iter().map(|file| {
            let semaphore = Arc::clone(&semaphore);
            let scope_key = scope_key.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let cache_key = file
                    .fingerprint
                    .scoped(&format!("{}:{}", scope_key, file.language));
                if let Some(value) = self.cache.get(Namespace::Analysis, &cache_key).await {
                    if let Ok(rep) = serde_json::from_value::<Representation>(value) {
                        return ArtifactResult::Extracted(rep);
                    }
                }
                let analyzer = match self.registry.code_analyzer(&file.language) {
                    Ok(analyzer) => analyzer,
                    Err(err) => {
                        return ArtifactResult::Failed {
                            artifact: file.path.clone(),
                            message: err.to_string(),
                        }
                    }
                };
                match analyzer.analyze(file, scope).await {
                    Ok(rep) => {
                        if let Ok(value) = serde_json::to_value(&rep) {
                            self.cache.put(Namespace::Analysis, &cache_key, value).await;
                        }
                        ArtifactResult::Extracted(rep)
                    }
                    Err(err) => ArtifactResult::Failed {
                        artifact: file.path.clone(),
                        message: err.to_string(),
                    },
                }
            }
        });

        let screenshot_futures = bundle.screenshots.iter().map(|screenshot| {
            let semaphore = Arc::clone(&semaphore);
            let scope_key = scope_key.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                let cache_key = screenshot.fingerprint.scoped(&scope_key);
                if let Some(value) = self.cache.get(Namespace::Analysis, &cache_key).await {
                    if let Ok(rep) = serde_json::from_value::<Representation>(value) {
                        return ArtifactResult::Extracted(rep);
                    }
                }
                let analyzer = match self.registry.visual_analyzer() {
                    Ok(analyzer) => analyzer,
                    Err(err) => {
                        return ArtifactResult::Failed {
                            artifact: screenshot.path.clone(),
                            message: err.to_string(),
                        }
                    }
                };
                match analyzer.analyze(screenshot, scope).await {
                    Ok(rep) => {
                        if let Ok(value) = serde_json::to_value(&rep) {
                            self.cache.put(Namespace::Analysis, &cache_key, value).await;
                        }
                        ArtifactResult::Extracted(rep)
                    }
                    Err(err) => ArtifactResult::Failed {
                        artifact: screenshot.path.clone(),
                        message: err.to_string(),
                    },
                }
            }
        });

        // join_all preserves input order, which the merge relies on.
        let file_results = join_all(file_futures).await;
        let screenshot_results = join_all(screenshot_futures).await;

        let total = file_results.len() + screenshot_results.len();
        let mut merged = Representation::default();
        let mut logs = Vec::new();
        let mut failures = 0usize;

        for result in file_results.into_iter().chain(screenshot_results) {
            match result {
                ArtifactResult::Extracted(rep) => merged.merge(rep),
                ArtifactResult::Failed { artifact, message } => {
                    failures += 1;
                    warn!(side = %side, artifact = %artifact, error = %message, "artifact analysis failed");
                    logs.push(
                        SessionLogEntry::new(
                            LogLevel::Warn,
                            format!("{} analysis failed for {}", side, artifact),
                        )
                        .with_payload(json!({ "artifact": artifact, "error": message })),
                    );
                }
            }
        }

        if total > 0 && failures == total {
            return Err(FidelisError::Internal(format!(
                "every {} artifact failed analysis",
                side
            )));
        }
        if failures > 0 {
            merged.partial = true;
        }
        merged.disambiguate_ids();

        logs.push(SessionLogEntry::new(
            LogLevel::Info,
            format!(
                "{} analysis complete: {} ui elements, {} functions, {} data structures, {} endpoints",
                side,
                merged.ui_elements.len(),
                merged.functions.len(),
                merged.data_structures.len(),
                merged.endpoints.len()
            ),
        ));

        Ok(AnalysisOutcome {
            representation: merged,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fidelis_core::{
        AnalysisMethod, BackendFunction, CacheConfig, CodeAnalyzer, CodeFile, ComplexityBand,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAnalyzer {
        calls: AtomicUsize,
        fail_paths: Vec<String>,
    }

    #[async_trait]
    impl CodeAnalyzer for CountingAnalyzer {
        fn languages(&self) -> &[&'static str] {
            &["python", "html"]
        }

        async fn analyze(
            &self,
            file: &CodeFile,
            _scope: ValidationScope,
        ) -> Result<Representation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_paths.contains(&file.path) {
                return Err(FidelisError::Internal("parse failure".into()));
            }
            Ok(Representation {
                functions: vec![BackendFunction {
                    name: file.path.replace(['/', '.'], "_"),
                    parameters: Vec::new(),
                    return_type: None,
                    http_method: None,
                    route: None,
                    logic_summary: None,
                    complexity: ComplexityBand::Low,
                    analysis_method: AnalysisMethod::RegexFallback,
                }],
                ..Default::default()
            })
        }
    }

    fn runner_with(analyzer: Arc<CountingAnalyzer>) -> AnalysisStageRunner {
        let mut registry = AnalyzerRegistry::empty();
        registry.register_code(analyzer);
        AnalysisStageRunner::new(
            Arc::new(registry),
            Arc::new(FingerprintCache::new(CacheConfig::default())),
            4,
        )
    }

    fn bundle(paths: &[&str]) -> InputBundle {
        InputBundle {
            files: paths.iter().map(|p| CodeFile::new(*p, "content")).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn merge_preserves_bundle_order() {
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
            fail_paths: Vec::new(),
        });
        let runner = runner_with(Arc::clone(&analyzer));
        let outcome = runner
            .analyze(
                Side::Source,
                &bundle(&["a.py", "b.py", "c.py"]),
                ValidationScope::Full,
            )
            .await
            .unwrap();
        let names: Vec<_> = outcome
            .representation
            .functions
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, ["a_py", "b_py", "c_py"]);
    }

    #[tokio::test]
    async fn repeat_analysis_hits_the_cache() {
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
            fail_paths: Vec::new(),
        });
        let runner = runner_with(Arc::clone(&analyzer));
        let files = bundle(&["a.py"]);
        runner
            .analyze(Side::Source, &files, ValidationScope::Full)
            .await
            .unwrap();
        runner
            .analyze(Side::Source, &files, ValidationScope::Full)
            .await
            .unwrap();
        assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn partial_failure_flags_but_does_not_abort() {
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
            fail_paths: vec!["bad.py".to_string()],
        });
        let runner = runner_with(analyzer);
        let outcome = runner
            .analyze(
                Side::Source,
                &bundle(&["good.py", "bad.py"]),
                ValidationScope::Full,
            )
            .await
            .unwrap();
        assert!(outcome.representation.partial);
        assert_eq!(outcome.representation.functions.len(), 1);
        assert!(outcome
            .logs
            .iter()
            .any(|l| l.level == LogLevel::Warn && l.message.contains("bad.py")));
    }

    #[tokio::test]
    async fn total_failure_aborts_the_stage() {
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
            fail_paths: vec!["a.py".to_string(), "b.py".to_string()],
        });
        let runner = runner_with(analyzer);
        let err = runner
            .analyze(Side::Source, &bundle(&["a.py", "b.py"]), ValidationScope::Full)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "internal");
    }

    #[tokio::test]
    async fn sides_run_in_parallel_and_independently() {
        let analyzer = Arc::new(CountingAnalyzer {
            calls: AtomicUsize::new(0),
            fail_paths: Vec::new(),
        });
        let runner = runner_with(Arc::clone(&analyzer));
        let (source, target) = runner
            .analyze_both(&bundle(&["s.py"]), &bundle(&["t.py"]), ValidationScope::Full)
            .await
            .unwrap();
        assert_eq!(source.representation.functions[0].name, "s_py");
        assert_eq!(target.representation.functions[0].name, "t_py");
    }
}
