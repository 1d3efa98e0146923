use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use fidelis_core::{
    Component, Credentials, Discrepancy, DiscrepancyKind, OverallStatus, ScenarioSpec, Severity,
    StageKind, StageResult,
};

use crate::scenario::expand_scenario;
use crate::trace::{compare_traces, scenario_score, InteractionTrace, Prober};

/// Execution record for one scenario, persisted alongside the stage
/// result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub scenario_name: String,
    pub execution_status: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_trace: Option<InteractionTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_trace: Option<InteractionTrace>,
    pub execution_duration_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct BehavioralOutcome {
    pub stage: StageResult,
    pub reports: Vec<ScenarioReport>,
}

/// Drives the prober over both URLs and compares the resulting traces.
/// Scenarios run sequentially (browser sessions are expensive); the
/// source/target pair of one scenario runs in parallel.
pub struct BehavioralStageRunner {
    prober: Arc<dyn Prober>,
}

impl BehavioralStageRunner {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    pub async fn probe(
        &self,
        source_url: &str,
        target_url: &str,
        scenarios: &[ScenarioSpec],
        credentials: Option<&Credentials>,
        scenario_timeout: Duration,
    ) -> BehavioralOutcome {
        let started = Instant::now();
        let mut discrepancies = Vec::new();
        let mut reports = Vec::new();
        let mut scores = Vec::new();

        for spec in scenarios {
            let scenario = expand_scenario(spec);
            let scenario_started = Instant::now();
            let deadline = scenario_started + scenario_timeout;

            let source_run = tokio::time::timeout(
                scenario_timeout,
                self.prober
                    .run_scenario(source_url, &scenario, credentials, deadline),
            );
            let target_run = tokio::time::timeout(
                scenario_timeout,
                self.prober
                    .run_scenario(target_url, &scenario, credentials, deadline),
            );
            let (source_outcome, target_outcome) = tokio::join!(source_run, target_run);

            let duration = scenario_started.elapsed().as_secs_f64();
            match (flatten(source_outcome), flatten(target_outcome)) {
                (Ok(source_trace), Ok(target_trace)) => {
                    let comparison = compare_traces(&source_trace, &target_trace);
                    let score = scenario_score(&comparison);
                    scores.push(score);
                    discrepancies.extend(comparison.discrepancies);
                    reports.push(ScenarioReport {
                        scenario_name: scenario.name.clone(),
                        execution_status: "completed".into(),
                        score,
                        source_trace: Some(source_trace),
                        target_trace: Some(target_trace),
                        execution_duration_secs: duration,
                        error: None,
                    });
                }
                (source_result, target_result) => {
                    let error = source_result
                        .err()
                        .or(target_result.err())
                        .unwrap_or_else(|| "unknown prober failure".into());
                    warn!(scenario = %scenario.name, error = %error, "scenario failed to run");
                    // A scenario the prober cannot run scores zero; the
                    // rest continue.
                    scores.push(0.0);
                    let (kind, severity, description) = if error.contains("deadline") {
                        (
                            DiscrepancyKind::ScenarioError,
                            Severity::Critical,
                            format!("scenario '{}' exceeded its deadline", scenario.name),
                        )
                    } else {
                        (
                            DiscrepancyKind::ScenarioError,
                            Severity::Critical,
                            format!("scenario '{}' failed: {}", scenario.name, error),
                        )
                    };
                    discrepancies.push(
                        Discrepancy::new(kind, severity, description)
                            .source(format!("scenario:{}", scenario.name))
                            .component(Component::Behavioral),
                    );
                    reports.push(ScenarioReport {
                        scenario_name: scenario.name.clone(),
                        execution_status: "error".into(),
                        score: 0.0,
                        source_trace: None,
                        target_trace: None,
                        execution_duration_secs: duration,
                        error: Some(error),
                    });
                }
            }
        }

        let fidelity_score = if scores.is_empty() {
            0.0
        } else {
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            (mean * 10_000.0).round() / 10_000.0
        };

        let all_errored = !reports.is_empty() && reports.iter().all(|r| r.error.is_some());
        let critical = discrepancies
            .iter()
            .filter(|d| d.severity == Severity::Critical)
            .count();
        let warning = discrepancies
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();

        let (status, error_reason) = if all_errored || scenarios.is_empty() {
            (
                OverallStatus::Error,
                Some("no behavioral scenario produced traces".to_string()),
            )
        } else if critical > 0 {
            (OverallStatus::Rejected, None)
        } else if fidelity_score >= 0.95 && warning == 0 {
            (OverallStatus::Approved, None)
        } else {
            (OverallStatus::ApprovedWithWarnings, None)
        };

        let summary = format!(
            "{} scenario(s), mean score {:.4}, {} critical divergence(s)",
            reports.len(),
            fidelity_score,
            critical
        );

        BehavioralOutcome {
            stage: StageResult {
                stage_kind: StageKind::Behavioral,
                status,
                fidelity_score,
                summary,
                discrepancies,
                source_representation: None,
                target_representation: None,
                execution_time_secs: started.elapsed().as_secs_f64(),
                error_reason,
            },
            reports,
        }
    }
}

fn flatten(
    outcome: std::result::Result<fidelis_core::Result<InteractionTrace>, tokio::time::error::Elapsed>,
) -> std::result::Result<InteractionTrace, String> {
    match outcome {
        Ok(Ok(trace)) => Ok(trace),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("scenario deadline exceeded".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{PageState, StepOutcome, TraceStep};
    use async_trait::async_trait;
    use fidelis_core::{ActionKind, FidelisError, Result, ScenarioAction};

    /// Prober returning canned traces per URL, with optional failure and
    /// delay behavior.
    struct MockProber {
        fail_url: Option<String>,
        delay: Option<Duration>,
        diverge_target: bool,
    }

    fn canned_trace(name: &str, fingerprint: &str) -> InteractionTrace {
        InteractionTrace {
            scenario: name.to_string(),
            steps: vec![TraceStep {
                action: ScenarioAction {
                    kind: ActionKind::Navigate,
                    selector: None,
                    input: None,
                },
                outcome: StepOutcome::Ok,
                state: PageState {
                    url: "/home".into(),
                    state_fingerprint: fingerprint.into(),
                    validation_errors: Vec::new(),
                    messages: Vec::new(),
                },
                duration_ms: 50,
            }],
        }
    }

    #[async_trait]
    impl Prober for MockProber {
        async fn run_scenario(
            &self,
            url: &str,
            scenario: &ScenarioSpec,
            _credentials: Option<&Credentials>,
            _deadline: Instant,
        ) -> Result<InteractionTrace> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_url.as_deref() == Some(url) {
                return Err(FidelisError::ProberFailure("browser crashed".into()));
            }
            let fingerprint = if self.diverge_target && url.contains("target") {
                "divergent"
            } else {
                "stable"
            };
            Ok(canned_trace(&scenario.name, fingerprint))
        }
    }

    fn scenarios(names: &[&str]) -> Vec<ScenarioSpec> {
        names
            .iter()
            .map(|n| ScenarioSpec {
                name: n.to_string(),
                actions: Vec::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn matching_traces_approve() {
        let runner = BehavioralStageRunner::new(Arc::new(MockProber {
            fail_url: None,
            delay: None,
            diverge_target: false,
        }));
        let outcome = runner
            .probe(
                "http://source",
                "http://target",
                &scenarios(&["login"]),
                None,
                Duration::from_secs(5),
            )
            .await;
        assert_eq!(outcome.stage.status, OverallStatus::Approved);
        assert_eq!(outcome.stage.fidelity_score, 1.0);
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.reports[0].execution_status, "completed");
    }

    #[tokio::test]
    async fn prober_failure_zeroes_that_scenario_only() {
        let runner = BehavioralStageRunner::new(Arc::new(MockProber {
            fail_url: Some("http://target".into()),
            delay: None,
            diverge_target: false,
        }));
        let outcome = runner
            .probe(
                "http://source",
                "http://target",
                &scenarios(&["login", "smoke"]),
                None,
                Duration::from_secs(5),
            )
            .await;
        // Both scenarios hit the failing target; every report errors and
        // the stage reports an error status.
        assert!(outcome.reports.iter().all(|r| r.error.is_some()));
        assert_eq!(outcome.stage.status, OverallStatus::Error);
        assert!(outcome.stage.error_reason.is_some());
    }

    #[tokio::test]
    async fn timeout_records_critical_scenario_error() {
        let runner = BehavioralStageRunner::new(Arc::new(MockProber {
            fail_url: None,
            delay: Some(Duration::from_millis(200)),
            diverge_target: false,
        }));
        let outcome = runner
            .probe(
                "http://source",
                "http://target",
                &scenarios(&["login"]),
                None,
                Duration::from_millis(20),
            )
            .await;
        assert_eq!(outcome.reports[0].execution_status, "error");
        assert!(outcome
            .stage
            .discrepancies
            .iter()
            .any(|d| d.kind == DiscrepancyKind::ScenarioError
                && d.severity == Severity::Critical
                && d.description.contains("deadline")));
    }

    #[tokio::test]
    async fn state_divergence_rejects() {
        let runner = BehavioralStageRunner::new(Arc::new(MockProber {
            fail_url: None,
            delay: None,
            diverge_target: true,
        }));
        let outcome = runner
            .probe(
                "http://source",
                "http://target",
                &scenarios(&["login"]),
                None,
                Duration::from_secs(5),
            )
            .await;
        // Same url, different fingerprint: message-level warning.
        assert_eq!(outcome.stage.status, OverallStatus::ApprovedWithWarnings);
        assert!(outcome
            .stage
            .discrepancies
            .iter()
            .any(|d| d.kind == DiscrepancyKind::MessageTextDiffers));
    }
}
