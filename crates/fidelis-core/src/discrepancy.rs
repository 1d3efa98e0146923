use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::types::Severity;

/// The kind of difference a discrepancy records. Wire names are stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    MissingElement,
    AdditionalElement,
    ElementRenamed,
    TypeMismatch,
    ConstraintMissing,
    ConstraintAdded,
    RequiredTightened,
    RequiredRelaxed,
    SignatureChange,
    ReturnTypeMismatch,
    LogicDivergence,
    MissingHttpMethod,
    ExtraHttpMethod,
    PathMismatch,
    HandlerMismatch,
    UiKindMismatch,
    UiTextChanged,
    UiElementRenamed,
    UiAttributeChanged,
    NavigationDivergence,
    ValidationDivergence,
    MessageTextDiffers,
    TimingDivergence,
    ScenarioError,
    ResponseUnparseable,
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = serde_json::to_value(self).map_err(|_| fmt::Error)?;
        match v {
            Value::String(s) => write!(f, "{}", s),
            _ => Err(fmt::Error),
        }
    }
}

/// Which part of the system a discrepancy belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Ui,
    Backend,
    Data,
    Api,
    Behavioral,
}

/// One detected difference between source and target. At least one of
/// `source_element` / `target_element` is always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub kind: DiscrepancyKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_element: Option<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<Component>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation_context: BTreeMap<String, Value>,
}

impl Discrepancy {
    pub fn new(kind: DiscrepancyKind, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
            source_element: None,
            target_element: None,
            confidence: 1.0,
            recommendation: None,
            component: None,
            validation_context: BTreeMap::new(),
        }
    }

    pub fn source(mut self, element: impl Into<String>) -> Self {
        self.source_element = Some(element.into());
        self
    }

    pub fn target(mut self, element: impl Into<String>) -> Self {
        self.target_element = Some(element.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn recommend(mut self, text: impl Into<String>) -> Self {
        self.recommendation = Some(text.into());
        self
    }

    pub fn component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.validation_context.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_are_snake_case() {
        assert_eq!(DiscrepancyKind::MissingElement.to_string(), "missing_element");
        assert_eq!(
            DiscrepancyKind::MissingHttpMethod.to_string(),
            "missing_http_method"
        );
        assert_eq!(DiscrepancyKind::UiTextChanged.to_string(), "ui_text_changed");
    }

    #[test]
    fn confidence_defaults_to_one_and_clamps() {
        let d = Discrepancy::new(
            DiscrepancyKind::TypeMismatch,
            Severity::Critical,
            "type changed",
        );
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.confidence(1.7).confidence, 1.0);
    }
}
