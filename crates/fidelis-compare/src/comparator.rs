use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use fidelis_ai::{prompts, Dispatcher, LlmEnvelope};
use fidelis_core::{
    ApiEndpoint, BackendFunction, Component, DataStructure, Discrepancy, DiscrepancyKind,
    OverallStatus, Representation, Result, Severity, StageKind, StageResult, TemperatureBand,
    UiElement, ValidationScope,
};

use crate::elements::{
    compare_data_structures, compare_endpoints, compare_functions, compare_ui_elements,
    LogicVerdict,
};
use crate::normalize::normalize_path;
use crate::pairing::{apply_semantic_pairs, pair_elements, PairingOutcome};
use crate::score::{
    category_score, discrepancy_mass, project_status, scope_weights, static_stage_score, Category,
};
use crate::severity::severity_for;

/// Per-call context threaded from the session worker.
#[derive(Debug, Clone)]
pub struct CompareContext {
    pub session_id: Option<String>,
    pub deadline: Instant,
}

impl CompareContext {
    pub fn detached() -> Self {
        Self {
            session_id: None,
            deadline: Instant::now() + Duration::from_secs(300),
        }
    }
}

/// The semantic comparator: pairs elements per category, compares pairs,
/// and produces the static stage result with scope-weighted scores. The
/// dispatcher is optional; without it the semantic pairing and logic
/// comparison layers are skipped.
pub struct SemanticComparator {
    dispatcher: Option<Arc<Dispatcher>>,
}

impl SemanticComparator {
    pub fn new(dispatcher: Option<Arc<Dispatcher>>) -> Self {
        Self { dispatcher }
    }

    pub async fn compare(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
        ctx: &CompareContext,
    ) -> Result<StageResult> {
        let started = Instant::now();
        let weights = scope_weights(scope);
        let active = |category: Category| {
            weights
                .iter()
                .any(|(c, w)| *c == category && *w > 0.0)
        };

        let mut discrepancies: Vec<Discrepancy> = Vec::new();
        let mut category_scores: Vec<(Category, Option<f64>)> = Vec::new();

        if active(Category::BackendFunctions) {
            let score = self
                .compare_function_category(source, target, scope, ctx, &mut discrepancies)
                .await;
            category_scores.push((Category::BackendFunctions, score));
        }
        if active(Category::DataStructures) {
            let score = self
                .compare_data_category(source, target, scope, ctx, &mut discrepancies)
                .await;
            category_scores.push((Category::DataStructures, score));
        }
        if active(Category::Endpoints) {
            let score = self
                .compare_endpoint_category(source, target, scope, ctx, &mut discrepancies)
                .await;
            category_scores.push((Category::Endpoints, score));
        }
        if active(Category::Ui) {
            let score = self
                .compare_ui_category(source, target, scope, ctx, &mut discrepancies)
                .await;
            category_scores.push((Category::Ui, score));
        }

        let fidelity_score = static_stage_score(scope, &category_scores);
        let (critical, warning) = severity_counts(&discrepancies);
        let status = project_status(fidelity_score, critical, warning);
        let summary = match status {
            OverallStatus::Approved => {
                "Static validation passed with no significant discrepancies".to_string()
            }
            OverallStatus::ApprovedWithWarnings => format!(
                "Static validation passed with {} warning(s) requiring review",
                warning
            ),
            OverallStatus::Rejected => format!(
                "Static validation failed: {} critical issue(s) must be resolved",
                critical
            ),
            OverallStatus::Error => "Static validation errored".to_string(),
        };

        Ok(StageResult {
            stage_kind: StageKind::Static,
            status,
            fidelity_score,
            summary,
            discrepancies,
            source_representation: Some(source.clone()),
            target_representation: Some(target.clone()),
            execution_time_secs: started.elapsed().as_secs_f64(),
            error_reason: None,
        })
    }

    async fn compare_function_category(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
        ctx: &CompareContext,
        out: &mut Vec<Discrepancy>,
    ) -> Option<f64> {
        if source.functions.is_empty() && target.functions.is_empty() {
            return None;
        }
        let signature_eq = |a: &BackendFunction, b: &BackendFunction| {
            a.parameters.len() == b.parameters.len()
                && a.parameters.iter().zip(&b.parameters).all(|(pa, pb)| {
                    match (&pa.type_name, &pb.type_name) {
                        (Some(ta), Some(tb)) => {
                            crate::normalize::normalize_type(ta)
                                == crate::normalize::normalize_type(tb)
                        }
                        (None, None) => true,
                        _ => false,
                    }
                })
                && !a.parameters.is_empty()
        };
        let mut outcome = pair_elements(
            &source.functions,
            &target.functions,
            |f| f.name.clone(),
            Some(&signature_eq),
        );
        self.semantic_layer(&mut outcome, "backend functions", |f| f.name.clone(), ctx, out)
            .await;

        let mut mass = 0.0;
        let element_count = outcome.element_count();

        for pair in &outcome.pairs {
            let verdict = self.logic_verdict(pair.source, pair.target, ctx, out).await;
            for discrepancy in compare_functions(pair, scope, verdict.as_ref()) {
                mass += discrepancy_mass(discrepancy.severity);
                out.push(discrepancy);
            }
        }
        mass += self.unpaired_discrepancies(
            scope,
            Component::Backend,
            outcome.missing.iter().map(|f| format!("function:{}", f.name)),
            outcome
                .additional
                .iter()
                .map(|f| format!("function:{}", f.name)),
            out,
        );

        Some(category_score(mass, element_count))
    }

    async fn compare_data_category(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
        ctx: &CompareContext,
        out: &mut Vec<Discrepancy>,
    ) -> Option<f64> {
        if source.data_structures.is_empty() && target.data_structures.is_empty() {
            return None;
        }
        let mut outcome = pair_elements(
            &source.data_structures,
            &target.data_structures,
            |s| s.name.clone(),
            None,
        );
        self.semantic_layer(&mut outcome, "data structures", |s| s.name.clone(), ctx, out)
            .await;

        let mut mass = 0.0;
        // Fields are the comparable unit for data structures; the score
        // denominator counts them rather than their containers.
        let element_count: usize = outcome
            .pairs
            .iter()
            .map(|p| p.source.fields.len().max(p.target.fields.len()))
            .sum::<usize>()
            + outcome
                .missing
                .iter()
                .map(|s: &&DataStructure| s.fields.len().max(1))
                .sum::<usize>()
            + outcome
                .additional
                .iter()
                .map(|s: &&DataStructure| s.fields.len().max(1))
                .sum::<usize>();

        for pair in &outcome.pairs {
            for discrepancy in compare_data_structures(pair, scope) {
                mass += discrepancy_mass(discrepancy.severity);
                out.push(discrepancy);
            }
        }
        mass += self.unpaired_discrepancies(
            scope,
            Component::Data,
            outcome.missing.iter().map(|s| format!("model:{}", s.name)),
            outcome
                .additional
                .iter()
                .map(|s| format!("model:{}", s.name)),
            out,
        );

        Some(category_score(mass, element_count))
    }

    async fn compare_endpoint_category(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
        ctx: &CompareContext,
        out: &mut Vec<Discrepancy>,
    ) -> Option<f64> {
        if source.endpoints.is_empty() && target.endpoints.is_empty() {
            return None;
        }
        let mut outcome: PairingOutcome<'_, ApiEndpoint> = pair_elements(
            &source.endpoints,
            &target.endpoints,
            |e| normalize_path(&e.path),
            None,
        );
        self.semantic_layer(&mut outcome, "api endpoints", |e| e.path.clone(), ctx, out)
            .await;

        let mut mass = 0.0;
        let element_count = outcome.element_count();

        for pair in &outcome.pairs {
            for discrepancy in compare_endpoints(pair, scope) {
                mass += discrepancy_mass(discrepancy.severity);
                out.push(discrepancy);
            }
        }
        mass += self.unpaired_discrepancies(
            scope,
            Component::Api,
            outcome
                .missing
                .iter()
                .map(|e| format!("endpoint:{}", e.path)),
            outcome
                .additional
                .iter()
                .map(|e| format!("endpoint:{}", e.path)),
            out,
        );

        Some(category_score(mass, element_count))
    }

    async fn compare_ui_category(
        &self,
        source: &Representation,
        target: &Representation,
        scope: ValidationScope,
        ctx: &CompareContext,
        out: &mut Vec<Discrepancy>,
    ) -> Option<f64> {
        if source.ui_elements.is_empty() && target.ui_elements.is_empty() {
            return None;
        }
        let mut outcome = pair_elements(
            &source.ui_elements,
            &target.ui_elements,
            |e: &UiElement| e.id.clone(),
            None,
        );
        self.semantic_layer(&mut outcome, "ui elements", |e| e.id.clone(), ctx, out)
            .await;

        let mut mass = 0.0;
        let element_count = outcome.element_count();

        for pair in &outcome.pairs {
            for discrepancy in compare_ui_elements(pair, scope) {
                mass += discrepancy_mass(discrepancy.severity);
                out.push(discrepancy);
            }
        }
        mass += self.unpaired_discrepancies(
            scope,
            Component::Ui,
            outcome
                .missing
                .iter()
                .map(|e| format!("{}#{}", e.kind, e.id)),
            outcome
                .additional
                .iter()
                .map(|e| format!("{}#{}", e.kind, e.id)),
            out,
        );

        Some(category_score(mass, element_count))
    }

    /// Emit missing/additional discrepancies and return their mass.
    fn unpaired_discrepancies(
        &self,
        scope: ValidationScope,
        component: Component,
        missing: impl Iterator<Item = String>,
        additional: impl Iterator<Item = String>,
        out: &mut Vec<Discrepancy>,
    ) -> f64 {
        let mut mass = 0.0;
        for pointer in missing {
            let kind = DiscrepancyKind::MissingElement;
            let severity = severity_for(scope, component, &kind);
            mass += discrepancy_mass(severity);
            out.push(
                Discrepancy::new(
                    kind,
                    severity,
                    format!("'{}' is missing in target", pointer),
                )
                .source(pointer)
                .component(component)
                .recommend("Restore the element or confirm it was intentionally dropped"),
            );
        }
        for pointer in additional {
            let kind = DiscrepancyKind::AdditionalElement;
            let severity = severity_for(scope, component, &kind);
            mass += discrepancy_mass(severity);
            out.push(
                Discrepancy::new(
                    kind,
                    severity,
                    format!("'{}' found only in target", pointer),
                )
                .target(pointer)
                .component(component),
            );
        }
        mass
    }

    /// Layer 3 pairing: batch the leftovers on both sides through the
    /// dispatcher. Failures degrade to no suggestions; an unparseable
    /// response leaves an info discrepancy per the error policy.
    async fn semantic_layer<'a, T, N>(
        &self,
        outcome: &mut PairingOutcome<'a, T>,
        category: &str,
        name_of: N,
        ctx: &CompareContext,
        out: &mut Vec<Discrepancy>,
    ) where
        N: Fn(&T) -> String + Copy,
    {
        let dispatcher = match &self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => return,
        };
        if outcome.missing.is_empty() || outcome.additional.is_empty() {
            return;
        }
        let source_names: Vec<String> = outcome.missing.iter().map(|e| name_of(e)).collect();
        let target_names: Vec<String> = outcome.additional.iter().map(|e| name_of(e)).collect();

        let mut envelope = LlmEnvelope::new(
            prompts::pairing_prompt(
                category,
                &json!(source_names).to_string(),
                &json!(target_names).to_string(),
            ),
            TemperatureBand::Low,
            ctx.deadline,
        )
        .system(prompts::COMPARISON_SYSTEM);
        envelope.session_id = ctx.session_id.clone();

        match dispatcher.ask_json(&envelope).await {
            Ok((value, _reply)) => {
                let suggestions: Vec<(String, String, f64)> = value
                    .get("pairs")
                    .and_then(|p| p.as_array())
                    .map(|pairs| {
                        pairs
                            .iter()
                            .filter_map(|p| {
                                Some((
                                    p.get("source")?.as_str()?.to_string(),
                                    p.get("target")?.as_str()?.to_string(),
                                    p.get("similarity")?.as_f64()?,
                                ))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                apply_semantic_pairs(outcome, &suggestions, name_of);
            }
            Err(err) if err.code() == "response-unparseable" => {
                out.push(
                    Discrepancy::new(
                        DiscrepancyKind::ResponseUnparseable,
                        Severity::Info,
                        format!("semantic pairing for {} returned malformed output", category),
                    )
                    .source(format!("category:{}", category))
                    .component(Component::Backend),
                );
            }
            Err(err) => {
                warn!(category, error = %err, "semantic pairing skipped");
            }
        }
    }

    /// LLM-assisted business-logic comparison for one paired function.
    async fn logic_verdict(
        &self,
        source: &BackendFunction,
        target: &BackendFunction,
        ctx: &CompareContext,
        out: &mut Vec<Discrepancy>,
    ) -> Option<LogicVerdict> {
        let dispatcher = self.dispatcher.as_ref()?;
        let (source_summary, target_summary) =
            match (&source.logic_summary, &target.logic_summary) {
                (Some(s), Some(t)) => (s, t),
                _ => return None,
            };
        if source_summary == target_summary {
            return Some(LogicVerdict {
                similarity: 1.0,
                diagnosis: "identical logic summaries".into(),
            });
        }

        let mut envelope = LlmEnvelope::new(
            prompts::logic_comparison_prompt(&source.name, source_summary, target_summary),
            TemperatureBand::Low,
            ctx.deadline,
        )
        .system(prompts::COMPARISON_SYSTEM);
        envelope.session_id = ctx.session_id.clone();

        match dispatcher.ask_json(&envelope).await {
            Ok((value, _reply)) => Some(LogicVerdict {
                similarity: value.get("similarity").and_then(|s| s.as_f64())?,
                diagnosis: value
                    .get("diagnosis")
                    .and_then(|d| d.as_str())
                    .unwrap_or("no diagnosis")
                    .to_string(),
            }),
            Err(err) if err.code() == "response-unparseable" => {
                out.push(
                    Discrepancy::new(
                        DiscrepancyKind::ResponseUnparseable,
                        Severity::Info,
                        format!(
                            "logic comparison for '{}' returned malformed output",
                            source.name
                        ),
                    )
                    .source(format!("function:{}", source.name))
                    .component(Component::Backend),
                );
                None
            }
            Err(err) => {
                warn!(function = %source.name, error = %err, "logic comparison skipped");
                None
            }
        }
    }
}

fn severity_counts(discrepancies: &[Discrepancy]) -> (usize, usize) {
    let critical = discrepancies
        .iter()
        .filter(|d| d.severity == Severity::Critical)
        .count();
    let warning = discrepancies
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .count();
    (critical, warning)
}
