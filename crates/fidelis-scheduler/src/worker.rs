use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use fidelis_ai::Dispatcher;
use fidelis_analysis::AnalysisStageRunner;
use fidelis_behavioral::BehavioralStageRunner;
use fidelis_compare::{synthesize, CompareContext, SemanticComparator};
use fidelis_core::{
    FidelisError, LogLevel, OverallStatus, Result, Session, SessionLogEntry, StageKind,
    StageResult, UnifiedResult,
};
use fidelis_session::SessionManager;

use crate::scheduler::{SessionPipeline, WorkerContext};

/// The production pipeline: static analysis, semantic comparison, the
/// optional behavioral stage, and fidelity synthesis. Each long phase
/// checks the cancellation token before starting.
pub struct ValidationPipeline {
    manager: Arc<SessionManager>,
    analysis: Arc<AnalysisStageRunner>,
    comparator: Arc<SemanticComparator>,
    behavioral: Option<Arc<BehavioralStageRunner>>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl ValidationPipeline {
    pub fn new(
        manager: Arc<SessionManager>,
        analysis: Arc<AnalysisStageRunner>,
        comparator: Arc<SemanticComparator>,
        behavioral: Option<Arc<BehavioralStageRunner>>,
        dispatcher: Option<Arc<Dispatcher>>,
    ) -> Self {
        Self {
            manager,
            analysis,
            comparator,
            behavioral,
            dispatcher,
        }
    }

    fn check_cancelled(ctx: &WorkerContext) -> Result<()> {
        if ctx.cancel.is_cancelled() {
            return Err(FidelisError::Cancelled);
        }
        Ok(())
    }

    async fn static_stage(
        &self,
        session: &Session,
        ctx: &WorkerContext,
    ) -> Result<StageResult> {
        let request_id = &session.request_id;
        self.manager
            .log(
                request_id,
                SessionLogEntry::new(LogLevel::Info, "stage 1: extracting representations"),
            )
            .await?;

        let (source, target) = self
            .analysis
            .analyze_both(&session.source_bundle, &session.target_bundle, session.scope)
            .await?;
        for entry in source.logs.into_iter().chain(target.logs) {
            self.manager.log(request_id, entry).await?;
        }

        Self::check_cancelled(ctx)?;
        self.manager
            .log(
                request_id,
                SessionLogEntry::new(LogLevel::Info, "stage 2: semantic comparison"),
            )
            .await?;

        let compare_ctx = CompareContext {
            session_id: Some(request_id.clone()),
            deadline: ctx.deadline,
        };
        let stage = self
            .comparator
            .compare(
                &source.representation,
                &target.representation,
                session.scope,
                &compare_ctx,
            )
            .await?;
        self.manager
            .log(
                request_id,
                SessionLogEntry::new(
                    LogLevel::Info,
                    format!(
                        "static stage {}: score {:.4}, {} discrepancies",
                        stage.status,
                        stage.fidelity_score,
                        stage.discrepancies.len()
                    ),
                ),
            )
            .await?;
        Ok(stage)
    }

    async fn behavioral_stage(
        &self,
        session: &Session,
        ctx: &WorkerContext,
    ) -> Result<Option<StageResult>> {
        let runner = match &self.behavioral {
            Some(runner) => runner,
            None => return Ok(None),
        };
        let (source_url, target_url) = match (
            session.source_bundle.url.as_deref(),
            session.target_bundle.url.as_deref(),
        ) {
            (Some(source), Some(target)) => (source, target),
            _ => return Ok(None),
        };
        if session.behavioral.scenarios.is_empty() {
            return Ok(None);
        }
        Self::check_cancelled(ctx)?;

        let request_id = &session.request_id;
        self.manager
            .log(
                request_id,
                SessionLogEntry::new(
                    LogLevel::Info,
                    format!(
                        "stage 3: behavioral probing, {} scenario(s)",
                        session.behavioral.scenarios.len()
                    ),
                ),
            )
            .await?;

        // The behavioral stage needs enough deadline headroom for at
        // least one scenario.
        let scenario_timeout = Duration::from_secs(session.behavioral.scenario_timeout_secs);
        let remaining = ctx.deadline.saturating_duration_since(std::time::Instant::now());
        if remaining < scenario_timeout {
            return Err(FidelisError::DeadlineExceeded(
                "not enough session budget left for behavioral probing".into(),
            ));
        }

        let outcome = runner
            .probe(
                source_url,
                target_url,
                &session.behavioral.scenarios,
                session.behavioral.credentials.as_ref(),
                scenario_timeout,
            )
            .await;

        for report in &outcome.reports {
            self.manager
                .store()
                .save_behavioral_report(
                    request_id,
                    &report.scenario_name,
                    &report.execution_status,
                    report
                        .source_trace
                        .as_ref()
                        .and_then(|t| serde_json::to_value(t).ok()),
                    report
                        .target_trace
                        .as_ref()
                        .and_then(|t| serde_json::to_value(t).ok()),
                    serde_json::to_value(report).ok(),
                    report.execution_duration_secs,
                    report.error.as_deref(),
                )
                .await?;
        }
        self.manager
            .log(
                request_id,
                SessionLogEntry::new(
                    LogLevel::Info,
                    format!(
                        "behavioral stage {}: score {:.4}",
                        outcome.stage.status, outcome.stage.fidelity_score
                    ),
                ),
            )
            .await?;
        Ok(Some(outcome.stage))
    }
}

#[async_trait]
impl SessionPipeline for ValidationPipeline {
    async fn run(&self, session: &Session, ctx: &WorkerContext) -> Result<UnifiedResult> {
        let request_id = &session.request_id;
        info!(request_id, scope = %session.scope, "pipeline started");

        let static_result = if session.scope.requires_static() {
            match self.static_stage(session, ctx).await {
                Ok(stage) => Some(stage),
                Err(err) if err.is_recoverable() => {
                    // Recoverable stage errors become stage-level error
                    // results rather than aborting the session.
                    self.manager
                        .log(
                            request_id,
                            SessionLogEntry::new(
                                LogLevel::Error,
                                format!("static stage error: {}", err),
                            ),
                        )
                        .await?;
                    Some(StageResult {
                        stage_kind: StageKind::Static,
                        status: OverallStatus::Error,
                        fidelity_score: 0.0,
                        summary: format!("static stage error: {}", err.code()),
                        discrepancies: Vec::new(),
                        source_representation: None,
                        target_representation: None,
                        execution_time_secs: 0.0,
                        error_reason: Some(err.code().to_string()),
                    })
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        Self::check_cancelled(ctx)?;

        let behavioral_result = if session.scope.requires_behavioral() {
            match self.behavioral_stage(session, ctx).await {
                Ok(stage) => stage,
                Err(err @ FidelisError::Cancelled) => return Err(err),
                Err(err @ FidelisError::DeadlineExceeded(_)) => return Err(err),
                Err(err) => {
                    self.manager
                        .log(
                            request_id,
                            SessionLogEntry::new(
                                LogLevel::Error,
                                format!("behavioral stage error: {}", err),
                            ),
                        )
                        .await?;
                    Some(StageResult {
                        stage_kind: StageKind::Behavioral,
                        status: OverallStatus::Error,
                        fidelity_score: 0.0,
                        summary: format!("behavioral stage error: {}", err.code()),
                        discrepancies: Vec::new(),
                        source_representation: None,
                        target_representation: None,
                        execution_time_secs: 0.0,
                        error_reason: Some(err.code().to_string()),
                    })
                }
            }
        } else {
            None
        };

        Self::check_cancelled(ctx)?;

        let result = synthesize(static_result, behavioral_result, session.scope, None)?;
        if let Some(dispatcher) = &self.dispatcher {
            let spend = dispatcher.spend(request_id);
            self.manager
                .log(
                    request_id,
                    SessionLogEntry::new(
                        LogLevel::Info,
                        format!(
                            "llm spend: {} tokens, ${:.4}",
                            spend.tokens, spend.cost_usd
                        ),
                    ),
                )
                .await?;
            dispatcher.forget_session(request_id);
        }
        info!(request_id, status = %result.overall_status, "pipeline finished");
        Ok(result)
    }
}
