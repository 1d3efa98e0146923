use serde::{Deserialize, Serialize};

use crate::types::ValidationScope;

/// The fixed catalog of technologies a validation request may name.
pub const TECHNOLOGIES: [&str; 11] = [
    "python-flask",
    "python-django",
    "java-spring",
    "csharp-dotnet",
    "php-laravel",
    "javascript-react",
    "javascript-vue",
    "javascript-angular",
    "typescript-react",
    "typescript-vue",
    "typescript-angular",
];

const FRONTEND: [&str; 6] = [
    "javascript-react",
    "javascript-vue",
    "javascript-angular",
    "typescript-react",
    "typescript-vue",
    "typescript-angular",
];

pub fn is_supported_technology(name: &str) -> bool {
    TECHNOLOGIES.contains(&name)
}

pub fn is_frontend(name: &str) -> bool {
    FRONTEND.contains(&name)
}

fn display_label(value: &str) -> String {
    value
        .split(['-', '_'])
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub value: String,
    pub label: String,
}

/// Catalogs served by `GET /api/technologies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnologyCatalog {
    pub technologies: Vec<CatalogEntry>,
    pub validation_scopes: Vec<CatalogEntry>,
}

impl TechnologyCatalog {
    pub fn current() -> Self {
        Self {
            technologies: TECHNOLOGIES
                .iter()
                .map(|t| CatalogEntry {
                    value: t.to_string(),
                    label: display_label(t),
                })
                .collect(),
            validation_scopes: ValidationScope::ALL
                .iter()
                .map(|s| CatalogEntry {
                    value: s.to_string(),
                    label: display_label(&s.to_string()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

/// Assess a source/target technology pair for a scope. Cross-paradigm
/// migrations are incompatible; same-paradigm framework changes warn.
pub fn check_compatibility(
    source: &str,
    target: &str,
    scope: ValidationScope,
) -> CompatibilityReport {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    for name in [source, target] {
        if !is_supported_technology(name) {
            issues.push(format!("unsupported technology: {}", name));
        }
    }

    if issues.is_empty() {
        let source_frontend = is_frontend(source);
        let target_frontend = is_frontend(target);

        if source_frontend != target_frontend {
            issues.push(format!(
                "cross-paradigm migration ({} -> {}) is not comparable",
                source, target
            ));
        } else if source != target {
            let family = |n: &str| n.split('-').next_back().unwrap_or(n).to_string();
            if family(source) != family(target) {
                warnings.push(format!(
                    "framework family change ({} -> {}) may reduce pairing accuracy",
                    source, target
                ));
            }
        }

        if scope == ValidationScope::Ui && !source_frontend && !target_frontend {
            warnings.push("ui scope works best with frontend technologies".to_string());
        }
        if scope == ValidationScope::BackendLogic && source_frontend && target_frontend {
            warnings.push("backend-logic scope works best with backend technologies".to_string());
        }
    }

    CompatibilityReport {
        compatible: issues.is_empty(),
        issues,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_paradigm_is_incompatible() {
        let report = check_compatibility("python-flask", "javascript-react", ValidationScope::Full);
        assert!(!report.compatible);
    }

    #[test]
    fn framework_family_change_warns() {
        let report =
            check_compatibility("javascript-react", "typescript-vue", ValidationScope::Ui);
        assert!(report.compatible);
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn same_family_language_upgrade_is_clean() {
        let report =
            check_compatibility("javascript-react", "typescript-react", ValidationScope::Ui);
        assert!(report.compatible);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn unknown_technology_is_an_issue() {
        let report = check_compatibility("cobol-cics", "java-spring", ValidationScope::Full);
        assert!(!report.compatible);
        assert!(report.issues[0].contains("cobol-cics"));
    }

    #[test]
    fn catalog_covers_all_scopes() {
        let catalog = TechnologyCatalog::current();
        assert_eq!(catalog.technologies.len(), TECHNOLOGIES.len());
        assert_eq!(catalog.validation_scopes.len(), ValidationScope::ALL.len());
        assert_eq!(catalog.technologies[0].label, "Python Flask");
    }
}
