use chrono::Utc;

use fidelis_core::{
    FidelisError, OverallStatus, Result, ResultKind, Severity, StageResult, UnifiedResult,
    ValidationScope,
};

use crate::score::{project_status, round4};

/// Default blend of static and behavioral stage scores.
pub const DEFAULT_STATIC_WEIGHT: f64 = 0.6;
pub const DEFAULT_BEHAVIORAL_WEIGHT: f64 = 0.4;

/// Merges stage results into the unified result under configurable
/// weights. At least one stage must be present.
pub fn synthesize(
    static_result: Option<StageResult>,
    behavioral_result: Option<StageResult>,
    _scope: ValidationScope,
    weights: Option<(f64, f64)>,
) -> Result<UnifiedResult> {
    let (static_weight, behavioral_weight) =
        weights.unwrap_or((DEFAULT_STATIC_WEIGHT, DEFAULT_BEHAVIORAL_WEIGHT));

    let result_kind = match (&static_result, &behavioral_result) {
        (Some(_), Some(_)) => ResultKind::Hybrid,
        (Some(_), None) => ResultKind::StaticOnly,
        (None, Some(_)) => ResultKind::BehavioralOnly,
        (None, None) => {
            return Err(FidelisError::Internal(
                "synthesize called with no stage results".into(),
            ))
        }
    };

    let stages: Vec<StageResult> = static_result
        .into_iter()
        .chain(behavioral_result)
        .collect();

    let errored: Vec<&StageResult> = stages
        .iter()
        .filter(|s| s.status == OverallStatus::Error)
        .collect();
    let scored: Vec<&StageResult> = stages
        .iter()
        .filter(|s| s.status != OverallStatus::Error)
        .collect();

    let fidelity_score = match scored.len() {
        2 => round4(
            static_weight * scored[0].fidelity_score
                + behavioral_weight * scored[1].fidelity_score,
        ),
        1 => round4(scored[0].fidelity_score),
        _ => 0.0,
    };

    let discrepancies: Vec<_> = stages
        .iter()
        .flat_map(|s| s.discrepancies.iter().cloned())
        .collect();
    let critical = discrepancies
        .iter()
        .filter(|d| d.severity == Severity::Critical)
        .count();
    let warning = discrepancies
        .iter()
        .filter(|d| d.severity == Severity::Warning)
        .count();

    // A stage error with no salvageable score degrades to rejected unless
    // the other stage is clean; then the overall result carries warnings
    // plus an error annotation.
    let mut error_annotation = None;
    let overall_status = if !errored.is_empty() {
        let annotation = errored
            .iter()
            .map(|s| {
                format!(
                    "{} stage error: {}",
                    s.stage_kind,
                    s.error_reason.as_deref().unwrap_or("unknown")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        error_annotation = Some(annotation);
        match scored.first() {
            Some(other) if other.status == OverallStatus::Approved => {
                OverallStatus::ApprovedWithWarnings
            }
            _ => OverallStatus::Rejected,
        }
    } else {
        project_status(fidelity_score, critical, warning)
    };

    let summary = match overall_status {
        OverallStatus::Approved => format!(
            "Migration approved with fidelity {:.4}",
            fidelity_score
        ),
        OverallStatus::ApprovedWithWarnings => format!(
            "Migration approved with {} warning(s), fidelity {:.4}",
            warning, fidelity_score
        ),
        OverallStatus::Rejected => format!(
            "Migration rejected: {} critical issue(s), fidelity {:.4}",
            critical, fidelity_score
        ),
        OverallStatus::Error => "Migration validation errored".to_string(),
    };

    let total_execution_time_secs = stages.iter().map(|s| s.execution_time_secs).sum();

    Ok(UnifiedResult {
        overall_status,
        fidelity_score,
        summary,
        discrepancies,
        stages,
        result_kind,
        total_execution_time_secs,
        timestamp: Utc::now(),
        error_annotation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fidelis_core::{Discrepancy, DiscrepancyKind, StageKind};

    fn stage(kind: StageKind, status: OverallStatus, score: f64) -> StageResult {
        StageResult {
            stage_kind: kind,
            status,
            fidelity_score: score,
            summary: String::new(),
            discrepancies: Vec::new(),
            source_representation: None,
            target_representation: None,
            execution_time_secs: 1.0,
            error_reason: None,
        }
    }

    #[test]
    fn hybrid_blend_uses_default_weights() {
        // 0.6·0.96 + 0.4·0.92 = 0.944
        let result = synthesize(
            Some(stage(StageKind::Static, OverallStatus::Approved, 0.96)),
            Some(stage(StageKind::Behavioral, OverallStatus::Approved, 0.92)),
            ValidationScope::Full,
            None,
        )
        .unwrap();
        assert_eq!(result.fidelity_score, 0.944);
        assert_eq!(result.overall_status, OverallStatus::ApprovedWithWarnings);
        assert_eq!(result.result_kind, ResultKind::Hybrid);
    }

    #[test]
    fn weight_override_is_honored() {
        let result = synthesize(
            Some(stage(StageKind::Static, OverallStatus::Approved, 1.0)),
            Some(stage(StageKind::Behavioral, OverallStatus::Approved, 0.5)),
            ValidationScope::Full,
            Some((0.5, 0.5)),
        )
        .unwrap();
        assert_eq!(result.fidelity_score, 0.75);
    }

    #[test]
    fn single_static_stage_passes_through() {
        let result = synthesize(
            Some(stage(StageKind::Static, OverallStatus::Approved, 0.97)),
            None,
            ValidationScope::Api,
            None,
        )
        .unwrap();
        assert_eq!(result.result_kind, ResultKind::StaticOnly);
        assert_eq!(result.fidelity_score, 0.97);
        assert_eq!(result.overall_status, OverallStatus::Approved);
    }

    #[test]
    fn critical_discrepancy_blocks_approval() {
        let mut static_stage = stage(StageKind::Static, OverallStatus::Rejected, 0.99);
        static_stage.discrepancies.push(Discrepancy::new(
            DiscrepancyKind::TypeMismatch,
            Severity::Critical,
            "price narrowed",
        ));
        let result = synthesize(Some(static_stage), None, ValidationScope::DataStructure, None)
            .unwrap();
        assert_eq!(result.overall_status, OverallStatus::Rejected);
    }

    #[test]
    fn errored_stage_degrades_unless_other_approved() {
        let mut errored = stage(StageKind::Behavioral, OverallStatus::Error, 0.0);
        errored.error_reason = Some("provider-unavailable".into());

        let rejected = synthesize(
            Some(stage(StageKind::Static, OverallStatus::ApprovedWithWarnings, 0.9)),
            Some(errored),
            ValidationScope::Full,
            None,
        )
        .unwrap();
        assert_eq!(rejected.overall_status, OverallStatus::Rejected);
        assert!(rejected.error_annotation.is_some());

        let mut errored = stage(StageKind::Behavioral, OverallStatus::Error, 0.0);
        errored.error_reason = Some("prober-failure".into());
        let salvaged = synthesize(
            Some(stage(StageKind::Static, OverallStatus::Approved, 0.99)),
            Some(errored),
            ValidationScope::Full,
            None,
        )
        .unwrap();
        assert_eq!(
            salvaged.overall_status,
            OverallStatus::ApprovedWithWarnings
        );
        assert!(salvaged
            .error_annotation
            .as_deref()
            .unwrap()
            .contains("behavioral"));
    }

    #[test]
    fn no_stages_is_an_internal_error() {
        assert!(synthesize(None, None, ValidationScope::Full, None).is_err());
    }
}
