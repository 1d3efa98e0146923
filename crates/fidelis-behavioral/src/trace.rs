use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use fidelis_core::{
    Component, Credentials, Discrepancy, DiscrepancyKind, Result, ScenarioAction, ScenarioSpec,
    Severity,
};

/// Observed page state after one interaction step. The fingerprint is a
/// stable hash over the page's structural content, computed by the prober.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub state_fingerprint: String,
    #[serde(default)]
    pub validation_errors: Vec<String>,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum StepOutcome {
    Ok,
    Failed { reason: String },
}

/// One executed step of a scenario, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub action: ScenarioAction,
    pub outcome: StepOutcome,
    pub state: PageState,
    pub duration_ms: u64,
}

/// Ordered interaction trace for one scenario on one side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionTrace {
    pub scenario: String,
    pub steps: Vec<TraceStep>,
}

/// The behavioral collaborator: executes a scenario against a live URL and
/// returns the structured trace. The prober owns browser lifecycle and
/// must close its sessions on deadline.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn run_scenario(
        &self,
        url: &str,
        scenario: &ScenarioSpec,
        credentials: Option<&Credentials>,
        deadline: Instant,
    ) -> Result<InteractionTrace>;
}

/// Step-pairwise trace comparison per the behavioral stage rules.
pub struct TraceComparison {
    pub discrepancies: Vec<Discrepancy>,
    pub matched_steps: usize,
    pub total_steps: usize,
    pub critical_divergences: usize,
}

pub fn compare_traces(source: &InteractionTrace, target: &InteractionTrace) -> TraceComparison {
    let total_steps = source.steps.len().max(target.steps.len());
    let mut discrepancies = Vec::new();
    let mut matched_steps = 0;
    let mut critical_divergences = 0;

    for index in 0..total_steps {
        let step_pointer = format!("{}:step[{}]", source.scenario, index);
        let (source_step, target_step) = match (source.steps.get(index), target.steps.get(index)) {
            (Some(s), Some(t)) => (s, t),
            _ => {
                critical_divergences += 1;
                discrepancies.push(
                    Discrepancy::new(
                        DiscrepancyKind::NavigationDivergence,
                        Severity::Critical,
                        format!(
                            "scenario '{}' diverges at step {}: present on one side only",
                            source.scenario, index
                        ),
                    )
                    .source(step_pointer)
                    .component(Component::Behavioral),
                );
                continue;
            }
        };

        let source_errors = !source_step.state.validation_errors.is_empty();
        let target_errors = !target_step.state.validation_errors.is_empty();
        let same_url = source_step.state.url == target_step.state.url;
        let same_fingerprint =
            source_step.state.state_fingerprint == target_step.state.state_fingerprint;

        if source_errors != target_errors {
            critical_divergences += 1;
            discrepancies.push(
                Discrepancy::new(
                    DiscrepancyKind::ValidationDivergence,
                    Severity::Critical,
                    format!(
                        "validation error present on {} side only at step {}",
                        if source_errors { "source" } else { "target" },
                        index
                    ),
                )
                .source(step_pointer.clone())
                .target(step_pointer)
                .component(Component::Behavioral),
            );
            continue;
        }

        if !same_url || source_step.outcome != target_step.outcome {
            critical_divergences += 1;
            discrepancies.push(
                Discrepancy::new(
                    DiscrepancyKind::NavigationDivergence,
                    Severity::Critical,
                    format!(
                        "step {} transitions into a different page state ({} vs {})",
                        index, source_step.state.url, target_step.state.url
                    ),
                )
                .source(step_pointer.clone())
                .target(step_pointer)
                .component(Component::Behavioral),
            );
            continue;
        }

        if !same_fingerprint {
            // Same state class (url + outcome) but different content.
            discrepancies.push(
                Discrepancy::new(
                    DiscrepancyKind::MessageTextDiffers,
                    Severity::Warning,
                    format!(
                        "step {} message content differs ('{}' vs '{}')",
                        index,
                        source_step.state.messages.join("; "),
                        target_step.state.messages.join("; ")
                    ),
                )
                .source(step_pointer.clone())
                .target(step_pointer)
                .component(Component::Behavioral),
            );
            continue;
        }

        matched_steps += 1;

        let slower = source_step.duration_ms.max(target_step.duration_ms);
        let faster = source_step.duration_ms.min(target_step.duration_ms).max(1);
        if slower / faster >= 2 {
            discrepancies.push(
                Discrepancy::new(
                    DiscrepancyKind::TimingDivergence,
                    Severity::Info,
                    format!(
                        "step {} timing differs beyond 2x ({} ms vs {} ms)",
                        index, source_step.duration_ms, target_step.duration_ms
                    ),
                )
                .source(step_pointer.clone())
                .target(step_pointer)
                .component(Component::Behavioral),
            );
        }
    }

    TraceComparison {
        discrepancies,
        matched_steps,
        total_steps,
        critical_divergences,
    }
}

/// Per-scenario score: matched/total with a 0.2 penalty per critical
/// divergence, clipped to [0, 1].
pub fn scenario_score(comparison: &TraceComparison) -> f64 {
    if comparison.total_steps == 0 {
        return 0.0;
    }
    let base = comparison.matched_steps as f64 / comparison.total_steps as f64;
    (base - 0.2 * comparison.critical_divergences as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_core::ActionKind;

    fn step(url: &str, fingerprint: &str, duration_ms: u64) -> TraceStep {
        TraceStep {
            action: ScenarioAction {
                kind: ActionKind::Click,
                selector: Some("#go".into()),
                input: None,
            },
            outcome: StepOutcome::Ok,
            state: PageState {
                url: url.into(),
                state_fingerprint: fingerprint.into(),
                validation_errors: Vec::new(),
                messages: Vec::new(),
            },
            duration_ms,
        }
    }

    fn trace(steps: Vec<TraceStep>) -> InteractionTrace {
        InteractionTrace {
            scenario: "login".into(),
            steps,
        }
    }

    #[test]
    fn identical_traces_match_fully() {
        let source = trace(vec![step("/home", "aaa", 100), step("/dash", "bbb", 120)]);
        let target = trace(vec![step("/home", "aaa", 110), step("/dash", "bbb", 130)]);
        let comparison = compare_traces(&source, &target);
        assert_eq!(comparison.matched_steps, 2);
        assert_eq!(comparison.critical_divergences, 0);
        assert!(comparison.discrepancies.is_empty());
        assert_eq!(scenario_score(&comparison), 1.0);
    }

    #[test]
    fn navigation_divergence_is_critical() {
        let source = trace(vec![step("/home", "aaa", 100), step("/dash", "bbb", 100)]);
        let target = trace(vec![step("/home", "aaa", 100), step("/error", "ccc", 100)]);
        let comparison = compare_traces(&source, &target);
        assert_eq!(comparison.critical_divergences, 1);
        assert_eq!(
            comparison.discrepancies[0].kind,
            DiscrepancyKind::NavigationDivergence
        );
        // 1 matched of 2, minus 0.2 penalty.
        assert!((scenario_score(&comparison) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn one_sided_validation_error_is_critical() {
        let mut errored = step("/form", "aaa", 100);
        errored.state.validation_errors.push("email required".into());
        let source = trace(vec![errored]);
        let target = trace(vec![step("/form", "aaa", 100)]);
        let comparison = compare_traces(&source, &target);
        assert_eq!(
            comparison.discrepancies[0].kind,
            DiscrepancyKind::ValidationDivergence
        );
        assert_eq!(comparison.discrepancies[0].severity, Severity::Critical);
    }

    #[test]
    fn same_state_class_different_text_warns() {
        let mut source_step = step("/done", "aaa", 100);
        source_step.state.messages.push("Saved!".into());
        let mut target_step = step("/done", "bbb", 100);
        target_step.state.messages.push("Changes saved".into());
        let comparison = compare_traces(&trace(vec![source_step]), &trace(vec![target_step]));
        assert_eq!(
            comparison.discrepancies[0].kind,
            DiscrepancyKind::MessageTextDiffers
        );
        assert_eq!(comparison.discrepancies[0].severity, Severity::Warning);
        assert_eq!(comparison.critical_divergences, 0);
    }

    #[test]
    fn slow_step_with_same_state_is_info() {
        let source = trace(vec![step("/home", "aaa", 100)]);
        let target = trace(vec![step("/home", "aaa", 250)]);
        let comparison = compare_traces(&source, &target);
        assert_eq!(comparison.matched_steps, 1);
        assert_eq!(
            comparison.discrepancies[0].kind,
            DiscrepancyKind::TimingDivergence
        );
        assert_eq!(scenario_score(&comparison), 1.0);
    }

    #[test]
    fn length_mismatch_is_critical_per_missing_step() {
        let source = trace(vec![step("/a", "aaa", 100), step("/b", "bbb", 100)]);
        let target = trace(vec![step("/a", "aaa", 100)]);
        let comparison = compare_traces(&source, &target);
        assert_eq!(comparison.total_steps, 2);
        assert_eq!(comparison.critical_divergences, 1);
    }
}
