use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::discrepancy::Discrepancy;
use crate::representation::Representation;
use crate::types::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Static,
    Behavioral,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Static => write!(f, "static"),
            StageKind::Behavioral => write!(f, "behavioral"),
        }
    }
}

/// Outcome of a single stage, or of the whole validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverallStatus {
    Approved,
    ApprovedWithWarnings,
    Rejected,
    Error,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverallStatus::Approved => "approved",
            OverallStatus::ApprovedWithWarnings => "approved-with-warnings",
            OverallStatus::Rejected => "rejected",
            OverallStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultKind {
    StaticOnly,
    BehavioralOnly,
    Hybrid,
}

/// Output of one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_kind: StageKind,
    pub status: OverallStatus,
    pub fidelity_score: f64,
    pub summary: String,
    pub discrepancies: Vec<Discrepancy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_representation: Option<Representation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_representation: Option<Representation>,
    pub execution_time_secs: f64,
    /// Required when status is `rejected`/`error` without a critical
    /// discrepancy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl StageResult {
    pub fn critical_count(&self) -> usize {
        self.discrepancies
            .iter()
            .filter(|d| d.severity == Severity::Critical)
            .count()
    }

    /// Invariant: a rejected/error stage carries a critical discrepancy or
    /// a non-null error reason.
    pub fn is_well_formed(&self) -> bool {
        match self.status {
            OverallStatus::Rejected | OverallStatus::Error => {
                self.critical_count() > 0 || self.error_reason.is_some()
            }
            _ => true,
        }
    }
}

/// Merge of all stage results for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResult {
    pub overall_status: OverallStatus,
    pub fidelity_score: f64,
    pub summary: String,
    pub discrepancies: Vec<Discrepancy>,
    pub stages: Vec<StageResult>,
    pub result_kind: ResultKind,
    pub total_execution_time_secs: f64,
    pub timestamp: DateTime<Utc>,
    /// Set when a stage errored but the overall result was salvaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_annotation: Option<String>,
}

impl UnifiedResult {
    pub fn severity_counts(&self) -> (usize, usize, usize) {
        let mut critical = 0;
        let mut warning = 0;
        let mut info = 0;
        for d in &self.discrepancies {
            match d.severity {
                Severity::Critical => critical += 1,
                Severity::Warning => warning += 1,
                Severity::Info => info += 1,
            }
        }
        (critical, warning, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discrepancy::DiscrepancyKind;

    fn stage(status: OverallStatus) -> StageResult {
        StageResult {
            stage_kind: StageKind::Static,
            status,
            fidelity_score: 0.5,
            summary: String::new(),
            discrepancies: Vec::new(),
            source_representation: None,
            target_representation: None,
            execution_time_secs: 0.0,
            error_reason: None,
        }
    }

    #[test]
    fn rejected_stage_needs_critical_or_reason() {
        let bare = stage(OverallStatus::Rejected);
        assert!(!bare.is_well_formed());

        let mut with_reason = stage(OverallStatus::Error);
        with_reason.error_reason = Some("provider-unavailable".to_string());
        assert!(with_reason.is_well_formed());

        let mut with_critical = stage(OverallStatus::Rejected);
        with_critical.discrepancies.push(Discrepancy::new(
            DiscrepancyKind::TypeMismatch,
            Severity::Critical,
            "x",
        ));
        assert!(with_critical.is_well_formed());
    }

    #[test]
    fn approved_stage_is_always_well_formed() {
        assert!(stage(OverallStatus::Approved).is_well_formed());
        assert!(stage(OverallStatus::ApprovedWithWarnings).is_well_formed());
    }
}
