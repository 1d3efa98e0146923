use fidelis_core::{Component, DiscrepancyKind, Severity, ValidationScope};

/// Severity policy: (category, change-kind, scope) -> severity.
///
/// Two scope rules modify the base table: nothing is critical under the UI
/// scope, and under data-structure / business-rules scopes type mismatches
/// and missing fields or functions are always critical.
pub fn severity_for(
    scope: ValidationScope,
    component: Component,
    kind: &DiscrepancyKind,
) -> Severity {
    let base = base_severity(component, kind);

    if scope == ValidationScope::Ui {
        return match base {
            Severity::Critical => Severity::Warning,
            other => other,
        };
    }

    if matches!(
        scope,
        ValidationScope::DataStructure | ValidationScope::BusinessRules
    ) {
        let forced_critical = matches!(kind, DiscrepancyKind::TypeMismatch)
            || (matches!(kind, DiscrepancyKind::MissingElement)
                && matches!(component, Component::Data | Component::Backend));
        if forced_critical {
            return Severity::Critical;
        }
    }

    base
}

fn base_severity(component: Component, kind: &DiscrepancyKind) -> Severity {
    match kind {
        DiscrepancyKind::MissingElement => Severity::Critical,
        DiscrepancyKind::AdditionalElement => Severity::Info,
        DiscrepancyKind::ElementRenamed | DiscrepancyKind::UiElementRenamed => Severity::Warning,
        DiscrepancyKind::TypeMismatch => Severity::Critical,
        DiscrepancyKind::RequiredTightened => Severity::Critical,
        DiscrepancyKind::RequiredRelaxed => Severity::Warning,
        DiscrepancyKind::ConstraintMissing => Severity::Warning,
        DiscrepancyKind::ConstraintAdded => Severity::Info,
        DiscrepancyKind::SignatureChange => Severity::Warning,
        DiscrepancyKind::ReturnTypeMismatch => Severity::Critical,
        DiscrepancyKind::LogicDivergence => Severity::Critical,
        DiscrepancyKind::MissingHttpMethod => Severity::Critical,
        DiscrepancyKind::ExtraHttpMethod => Severity::Warning,
        DiscrepancyKind::PathMismatch => Severity::Critical,
        DiscrepancyKind::HandlerMismatch => Severity::Info,
        DiscrepancyKind::UiKindMismatch => Severity::Critical,
        DiscrepancyKind::UiTextChanged => Severity::Warning,
        DiscrepancyKind::UiAttributeChanged => Severity::Info,
        DiscrepancyKind::NavigationDivergence | DiscrepancyKind::ValidationDivergence => {
            Severity::Critical
        }
        DiscrepancyKind::MessageTextDiffers => Severity::Warning,
        DiscrepancyKind::TimingDivergence => Severity::Info,
        DiscrepancyKind::ScenarioError => Severity::Critical,
        DiscrepancyKind::ResponseUnparseable => {
            let _ = component;
            Severity::Info
        }
    }
}

/// Attribute changes on `required`, `name` and `id` matter more than
/// cosmetic attributes.
pub fn ui_attribute_severity(scope: ValidationScope, attribute: &str) -> Severity {
    let significant = matches!(attribute, "required" | "name" | "id");
    let kind = DiscrepancyKind::UiAttributeChanged;
    let base = severity_for(scope, Component::Ui, &kind);
    if significant && base < Severity::Warning {
        Severity::Warning
    } else {
        base
    }
}
