use fidelis_core::{
    ApiEndpoint, BackendFunction, Component, DataStructure, Discrepancy, DiscrepancyKind,
    Severity, UiElement, ValidationScope,
};

use crate::normalize::{is_numeric_widening, normalize_name, normalize_type};
use crate::pairing::{pair_elements, Paired};
use crate::severity::{severity_for, ui_attribute_severity};

/// Logic-comparison verdict for one paired function, produced by the LLM
/// layer. Similarity below 0.7 yields a discrepancy.
pub struct LogicVerdict {
    pub similarity: f64,
    pub diagnosis: String,
}

pub const LOGIC_SIMILARITY_THRESHOLD: f64 = 0.7;

fn renamed_discrepancy(
    scope: ValidationScope,
    component: Component,
    kind: DiscrepancyKind,
    source: &str,
    target: &str,
    confidence: f64,
) -> Discrepancy {
    let severity = severity_for(scope, component, &kind);
    Discrepancy::new(
        kind,
        severity,
        format!("'{}' appears to be renamed to '{}'", source, target),
    )
    .source(source)
    .target(target)
    .confidence(confidence)
    .component(component)
    .recommend("Verify that the renamed element keeps the same behavior")
}

/// Field-level comparison of one paired data structure.
pub fn compare_data_structures(
    pair: &Paired<'_, DataStructure>,
    scope: ValidationScope,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();
    let component = Component::Data;

    if pair.renamed {
        out.push(renamed_discrepancy(
            scope,
            component,
            DiscrepancyKind::ElementRenamed,
            &pair.source.name,
            &pair.target.name,
            pair.confidence,
        ));
    }

    let fields = pair_elements(
        &pair.source.fields,
        &pair.target.fields,
        |f| f.name.clone(),
        None,
    );

    for field in &fields.missing {
        let kind = DiscrepancyKind::MissingElement;
        let severity = severity_for(scope, component, &kind);
        out.push(
            Discrepancy::new(
                kind,
                severity,
                format!(
                    "Data field '{}' (type: {}) of '{}' is missing in target",
                    field.name, field.type_name, pair.source.name
                ),
            )
            .source(format!("field:{}.{}", pair.source.name, field.name))
            .component(component)
            .recommend("Add the missing field or ensure the data is handled elsewhere"),
        );
    }
    for field in &fields.additional {
        let kind = DiscrepancyKind::AdditionalElement;
        let severity = severity_for(scope, component, &kind);
        out.push(
            Discrepancy::new(
                kind,
                severity,
                format!(
                    "Additional data field '{}' (type: {}) found in target '{}'",
                    field.name, field.type_name, pair.target.name
                ),
            )
            .target(format!("field:{}.{}", pair.target.name, field.name))
            .component(component)
            .recommend("Verify whether this field represents new requirements"),
        );
    }

    for field_pair in &fields.pairs {
        let source = field_pair.source;
        let target = field_pair.target;
        let source_pointer = format!("field:{}.{}:{}", pair.source.name, source.name, source.type_name);
        let target_pointer = format!("field:{}.{}:{}", pair.target.name, target.name, target.type_name);

        if field_pair.renamed {
            out.push(renamed_discrepancy(
                scope,
                component,
                DiscrepancyKind::ElementRenamed,
                &source.name,
                &target.name,
                field_pair.confidence,
            ));
        }

        let source_type = normalize_type(&source.type_name);
        let target_type = normalize_type(&target.type_name);
        if source_type != target_type {
            let kind = DiscrepancyKind::TypeMismatch;
            let mut severity = severity_for(scope, component, &kind);
            let widening = is_numeric_widening(&source_type, &target_type);
            if widening
                && severity == Severity::Critical
                && !matches!(
                    scope,
                    ValidationScope::DataStructure | ValidationScope::BusinessRules
                )
            {
                severity = Severity::Warning;
            }
            out.push(
                Discrepancy::new(
                    kind,
                    severity,
                    format!(
                        "Field '{}' type changed from {} to {}",
                        source.name, source.type_name, target.type_name
                    ),
                )
                .source(source_pointer.clone())
                .target(target_pointer.clone())
                .component(component)
                .recommend("Ensure the type conversion preserves data integrity"),
            );
        }

        if source.required != target.required {
            let kind = if target.required {
                DiscrepancyKind::RequiredTightened
            } else {
                DiscrepancyKind::RequiredRelaxed
            };
            let severity = severity_for(scope, component, &kind);
            out.push(
                Discrepancy::new(
                    kind,
                    severity,
                    format!(
                        "Field '{}' required flag changed from {} to {}",
                        source.name, source.required, target.required
                    ),
                )
                .source(source_pointer.clone())
                .target(target_pointer.clone())
                .component(component)
                .recommend("Verify the constraint change against existing data"),
            );
        }

        for constraint in &source.constraints {
            if !target.constraints.contains(constraint) {
                let kind = DiscrepancyKind::ConstraintMissing;
                let severity = severity_for(scope, component, &kind);
                out.push(
                    Discrepancy::new(
                        kind,
                        severity,
                        format!("Field '{}' lost constraint '{}'", source.name, constraint),
                    )
                    .source(source_pointer.clone())
                    .target(target_pointer.clone())
                    .component(component),
                );
            }
        }
        for constraint in &target.constraints {
            if !source.constraints.contains(constraint) {
                let kind = DiscrepancyKind::ConstraintAdded;
                let severity = severity_for(scope, component, &kind);
                out.push(
                    Discrepancy::new(
                        kind,
                        severity,
                        format!("Field '{}' gained constraint '{}'", target.name, constraint),
                    )
                    .source(source_pointer.clone())
                    .target(target_pointer.clone())
                    .component(component),
                );
            }
        }
    }

    out
}

/// Signature and logic comparison of one paired backend function. The
/// logic verdict comes from the LLM layer and may be absent when no
/// dispatcher is available.
pub fn compare_functions(
    pair: &Paired<'_, BackendFunction>,
    scope: ValidationScope,
    logic: Option<&LogicVerdict>,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();
    let component = Component::Backend;
    let source = pair.source;
    let target = pair.target;

    if pair.renamed {
        out.push(renamed_discrepancy(
            scope,
            component,
            DiscrepancyKind::ElementRenamed,
            &source.name,
            &target.name,
            pair.confidence,
        ));
    }

    let signature = |f: &BackendFunction| -> Vec<String> {
        f.parameters
            .iter()
            .map(|p| {
                p.type_name
                    .as_deref()
                    .map(normalize_type)
                    .unwrap_or_default()
            })
            .collect()
    };
    if source.parameters.len() != target.parameters.len() || signature(source) != signature(target)
    {
        let kind = DiscrepancyKind::SignatureChange;
        let severity = severity_for(scope, component, &kind);
        out.push(
            Discrepancy::new(
                kind,
                severity,
                format!(
                    "Function '{}' parameters changed from ({}) to ({})",
                    source.name,
                    source
                        .parameters
                        .iter()
                        .map(|p| p.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                    target
                        .parameters
                        .iter()
                        .map(|p| p.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )
            .source(format!("function:{}", source.name))
            .target(format!("function:{}", target.name))
            .component(component)
            .recommend("Verify that callers were migrated to the new signature"),
        );
    }

    let source_return = source.return_type.as_deref().map(normalize_type);
    let target_return = target.return_type.as_deref().map(normalize_type);
    if source_return != target_return {
        let kind = DiscrepancyKind::ReturnTypeMismatch;
        let severity = severity_for(scope, component, &kind);
        out.push(
            Discrepancy::new(
                kind,
                severity,
                format!(
                    "Function '{}' return type changed from {} to {}",
                    source.name,
                    source.return_type.as_deref().unwrap_or("none"),
                    target.return_type.as_deref().unwrap_or("none")
                ),
            )
            .source(format!("function:{}", source.name))
            .target(format!("function:{}", target.name))
            .component(component),
        );
    }

    if let Some(verdict) = logic {
        if verdict.similarity < LOGIC_SIMILARITY_THRESHOLD {
            let kind = DiscrepancyKind::LogicDivergence;
            let severity = severity_for(scope, component, &kind);
            out.push(
                Discrepancy::new(
                    kind,
                    severity,
                    format!(
                        "Business logic of '{}' diverges (similarity {:.2}): {}",
                        source.name, verdict.similarity, verdict.diagnosis
                    ),
                )
                .source(format!("function:{}", source.name))
                .target(format!("function:{}", target.name))
                .confidence(1.0 - verdict.similarity)
                .component(component)
                .recommend("Review the migrated logic against the original business rules"),
            );
        }
    }

    out
}

/// Method-set and handler comparison of one paired endpoint.
pub fn compare_endpoints(
    pair: &Paired<'_, ApiEndpoint>,
    scope: ValidationScope,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();
    let component = Component::Api;
    let source = pair.source;
    let target = pair.target;
    let pointer = |e: &ApiEndpoint| format!("endpoint:{}:{}", e.methods.join(","), e.path);

    if pair.renamed {
        // Only the semantic pairing layer produces renamed endpoint
        // pairs; existing clients still call the old path.
        let kind = DiscrepancyKind::PathMismatch;
        let severity = severity_for(scope, component, &kind);
        out.push(
            Discrepancy::new(
                kind,
                severity,
                format!(
                    "Endpoint path changed from '{}' to '{}'",
                    source.path, target.path
                ),
            )
            .source(pointer(source))
            .target(pointer(target))
            .confidence(pair.confidence)
            .component(component)
            .recommend("Add a redirect or migrate API consumers to the new path"),
        );
    }

    for method in &source.methods {
        if !target.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            let kind = DiscrepancyKind::MissingHttpMethod;
            let severity = severity_for(scope, component, &kind);
            out.push(
                Discrepancy::new(
                    kind,
                    severity,
                    format!("Endpoint '{}' lost method {}", source.path, method),
                )
                .source(pointer(source))
                .target(pointer(target))
                .component(component)
                .recommend("Restore the missing HTTP method or migrate its callers"),
            );
        }
    }
    for method in &target.methods {
        if !source.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
            let kind = DiscrepancyKind::ExtraHttpMethod;
            let severity = severity_for(scope, component, &kind);
            out.push(
                Discrepancy::new(
                    kind,
                    severity,
                    format!("Endpoint '{}' gained method {}", target.path, method),
                )
                .source(pointer(source))
                .target(pointer(target))
                .component(component),
            );
        }
    }

    if normalize_name(&source.handler) != normalize_name(&target.handler) {
        let kind = DiscrepancyKind::HandlerMismatch;
        let severity = severity_for(scope, component, &kind);
        out.push(
            Discrepancy::new(
                kind,
                severity,
                format!(
                    "Endpoint '{}' handler changed from '{}' to '{}'",
                    source.path, source.handler, target.handler
                ),
            )
            .source(pointer(source))
            .target(pointer(target))
            .component(component),
        );
    }

    out
}

/// Kind, text and attribute comparison of one paired UI element.
pub fn compare_ui_elements(
    pair: &Paired<'_, UiElement>,
    scope: ValidationScope,
) -> Vec<Discrepancy> {
    let mut out = Vec::new();
    let component = Component::Ui;
    let source = pair.source;
    let target = pair.target;
    let pointer = |e: &UiElement| format!("{}#{}", e.kind, e.id);

    if source.kind != target.kind {
        let kind = DiscrepancyKind::UiKindMismatch;
        let severity = severity_for(scope, component, &kind);
        out.push(
            Discrepancy::new(
                kind,
                severity,
                format!(
                    "UI element '{}' changed kind from {} to {}",
                    source.id, source.kind, target.kind
                ),
            )
            .source(pointer(source))
            .target(pointer(target))
            .component(component),
        );
        // A kind change dominates text and attribute diffs.
        return out;
    }

    if pair.renamed {
        out.push(renamed_discrepancy(
            scope,
            component,
            DiscrepancyKind::UiElementRenamed,
            &pointer(source),
            &pointer(target),
            pair.confidence,
        ));
    }

    let text_bearing = matches!(source.kind.as_str(), "button" | "label" | "link");
    if text_bearing && source.text != target.text {
        let kind = DiscrepancyKind::UiTextChanged;
        let severity = severity_for(scope, component, &kind);
        out.push(
            Discrepancy::new(
                kind,
                severity,
                format!(
                    "UI element '{}' text changed from '{}' to '{}'",
                    source.id,
                    source.text.as_deref().unwrap_or(""),
                    target.text.as_deref().unwrap_or("")
                ),
            )
            .source(pointer(source))
            .target(pointer(target))
            .component(component)
            .recommend("Confirm the copy change with the product owner"),
        );
    }

    for (name, value) in &source.attributes {
        let target_value = target.attributes.get(name);
        if target_value != Some(value) {
            let severity = ui_attribute_severity(scope, name);
            out.push(
                Discrepancy::new(
                    DiscrepancyKind::UiAttributeChanged,
                    severity,
                    format!(
                        "UI element '{}' attribute '{}' changed from '{}' to '{}'",
                        source.id,
                        name,
                        value,
                        target_value.map(String::as_str).unwrap_or("absent")
                    ),
                )
                .source(pointer(source))
                .target(pointer(target))
                .component(component),
            );
        }
    }

    out
}
