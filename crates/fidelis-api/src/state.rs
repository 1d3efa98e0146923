use std::sync::Arc;

use fidelis_ai::Dispatcher;
use fidelis_analysis::{AnalysisStageRunner, AnalyzerRegistry, LlmVisualAnalyzer};
use fidelis_behavioral::BehavioralStageRunner;
use fidelis_cache::FingerprintCache;
use fidelis_compare::SemanticComparator;
use fidelis_core::{FidelisConfig, Result};
use fidelis_scheduler::{Scheduler, ValidationPipeline};
use fidelis_session::{ProgressBroker, SessionManager, SessionStore};

/// Shared application state: the wired engine. The API layer holds no
/// business logic; everything routes through the scheduler and manager.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<FidelisConfig>,
    pub manager: Arc<SessionManager>,
    pub scheduler: Arc<Scheduler>,
    pub cache: Arc<FingerprintCache>,
    pub dispatcher: Option<Arc<Dispatcher>>,
}

impl AppState {
    /// Wire the engine from configuration. The behavioral prober is
    /// injected by the caller when one is available; `None` disables the
    /// behavioral stage.
    pub async fn build(
        config: FidelisConfig,
        prober: Option<Arc<dyn fidelis_behavioral::Prober>>,
    ) -> Result<Self> {
        let cache = Arc::new(FingerprintCache::new(config.cache.clone()));
        let dispatcher = if config.llm.providers.is_empty() {
            None
        } else {
            Some(Arc::new(Dispatcher::from_config(
                &config.llm,
                Arc::clone(&cache),
            )))
        };

        let mut registry = AnalyzerRegistry::with_defaults();
        if let Some(dispatcher) = &dispatcher {
            registry.register_visual(Arc::new(LlmVisualAnalyzer::new(Arc::clone(dispatcher))));
        }
        let analysis = Arc::new(AnalysisStageRunner::new(
            Arc::new(registry),
            Arc::clone(&cache),
            config.scheduler.analysis_concurrency,
        ));
        let comparator = Arc::new(SemanticComparator::new(dispatcher.clone()));
        let behavioral = prober.map(|p| Arc::new(BehavioralStageRunner::new(p)));

        let store = Arc::new(
            SessionStore::connect(&config.database.url, config.database.max_connections).await?,
        );
        let broker = Arc::new(ProgressBroker::new(config.broker.clone()));
        let manager = Arc::new(SessionManager::new(store, broker));

        let pipeline = Arc::new(ValidationPipeline::new(
            Arc::clone(&manager),
            analysis,
            comparator,
            behavioral,
            dispatcher.clone(),
        ));
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&manager),
            pipeline,
        );
        scheduler.start().await?;

        Ok(Self {
            config: Arc::new(config),
            manager,
            scheduler,
            cache,
            dispatcher,
        })
    }

    /// In-memory variant for tests and the CLI's one-shot commands.
    pub async fn build_ephemeral(
        mut config: FidelisConfig,
        prober: Option<Arc<dyn fidelis_behavioral::Prober>>,
    ) -> Result<Self> {
        config.database.url = "sqlite::memory:".to_string();
        config.database.max_connections = 1;
        Self::build(config, prober).await
    }
}
