use fidelis_core::{OverallStatus, Severity, ValidationScope};

/// Comparison category, one score per active category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    BackendFunctions,
    DataStructures,
    Endpoints,
    Ui,
    Behavioral,
}

/// Weight a discrepancy contributes to its category's mass.
pub fn discrepancy_mass(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 1.0,
        Severity::Warning => 0.5,
        Severity::Info => 0.1,
    }
}

/// Scope → category weight table. The behavioral entry applies only when
/// a behavioral stage actually ran; otherwise its mass is redistributed
/// proportionally across the active static categories.
pub fn scope_weights(scope: ValidationScope) -> [(Category, f64); 5] {
    use Category::*;
    match scope {
        ValidationScope::Ui => [
            (BackendFunctions, 0.0),
            (DataStructures, 0.0),
            (Endpoints, 0.0),
            (Ui, 1.0),
            (Behavioral, 0.0),
        ],
        ValidationScope::DataStructure => [
            (BackendFunctions, 0.1),
            (DataStructures, 0.9),
            (Endpoints, 0.0),
            (Ui, 0.0),
            (Behavioral, 0.0),
        ],
        ValidationScope::BackendLogic => [
            (BackendFunctions, 0.6),
            (DataStructures, 0.2),
            (Endpoints, 0.2),
            (Ui, 0.0),
            (Behavioral, 0.0),
        ],
        ValidationScope::Api => [
            (BackendFunctions, 0.2),
            (DataStructures, 0.1),
            (Endpoints, 0.7),
            (Ui, 0.0),
            (Behavioral, 0.0),
        ],
        ValidationScope::BusinessRules => [
            (BackendFunctions, 0.5),
            (DataStructures, 0.2),
            (Endpoints, 0.1),
            (Ui, 0.0),
            (Behavioral, 0.2),
        ],
        ValidationScope::Behavioral => [
            (BackendFunctions, 0.0),
            (DataStructures, 0.0),
            (Endpoints, 0.0),
            (Ui, 0.0),
            (Behavioral, 1.0),
        ],
        ValidationScope::Full => [
            (BackendFunctions, 0.25),
            (DataStructures, 0.15),
            (Endpoints, 0.2),
            (Ui, 0.1),
            (Behavioral, 0.3),
        ],
    }
}

/// Round to 4 decimals, the precision scores are reported at.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Per-category score: `1 - mass / max(elements, 1)`, clipped.
pub fn category_score(mass: f64, element_count: usize) -> f64 {
    let denominator = element_count.max(1) as f64;
    round4((1.0 - mass / denominator).clamp(0.0, 1.0))
}

/// Static stage score: weighted average of the active categories. A
/// category participates when its scope weight is non-zero and it had
/// elements on at least one side; absent categories (including the
/// behavioral column) surrender their mass proportionally.
pub fn static_stage_score(scope: ValidationScope, scores: &[(Category, Option<f64>)]) -> f64 {
    let weights = scope_weights(scope);
    let mut total_weight = 0.0;
    let mut accumulated = 0.0;
    for (category, weight) in weights {
        if category == Category::Behavioral || weight == 0.0 {
            continue;
        }
        if let Some((_, Some(score))) = scores.iter().find(|(c, _)| *c == category) {
            total_weight += weight;
            accumulated += weight * score;
        }
    }
    if total_weight == 0.0 {
        // Nothing to compare on either side: vacuously faithful.
        return 1.0;
    }
    round4(accumulated / total_weight)
}

/// Status projection from score and severity counts. Criticals always
/// reject; a clean high score approves; everything else is approved with
/// warnings.
pub fn project_status(score: f64, critical_count: usize, warning_count: usize) -> OverallStatus {
    if critical_count > 0 {
        OverallStatus::Rejected
    } else if score >= 0.95 && warning_count == 0 {
        OverallStatus::Approved
    } else {
        OverallStatus::ApprovedWithWarnings
    }
}
