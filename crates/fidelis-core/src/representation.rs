use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How an element was extracted, attached for downstream debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisMethod {
    Ast,
    RegexFallback,
    VisionModel,
}

impl fmt::Display for AnalysisMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnalysisMethod::Ast => "ast",
            AnalysisMethod::RegexFallback => "regex-fallback",
            AnalysisMethod::VisionModel => "vision-model",
        };
        write!(f, "{}", s)
    }
}

/// Complexity band assigned to a backend function by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityBand {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionParam {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendFunction {
    pub name: String,
    pub parameters: Vec<FunctionParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic_summary: Option<String>,
    pub complexity: ComplexityBand,
    pub analysis_method: AnalysisMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataField {
    pub name: String,
    pub type_name: String,
    pub required: bool,
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStructureKind {
    Model,
    Table,
    Dto,
    Enum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataStructure {
    pub name: String,
    pub kind: DataStructureKind,
    pub fields: Vec<DataField>,
    pub analysis_method: AnalysisMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEndpoint {
    pub path: String,
    /// Upper-cased HTTP method names, order as emitted by the analyzer.
    pub methods: Vec<String>,
    pub handler: String,
    pub analysis_method: AnalysisMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiElement {
    /// Element kind: input, button, label, table, link, form...
    pub kind: String,
    /// Stable identifier (DOM id, name attribute, or synthesized).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub analysis_method: AnalysisMethod,
}

/// The extracted abstract view of one side. Element order is preserved as
/// emitted by the analyzer; comparators use it only as a tie-breaker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Representation {
    #[serde(default)]
    pub functions: Vec<BackendFunction>,
    #[serde(default)]
    pub data_structures: Vec<DataStructure>,
    #[serde(default)]
    pub endpoints: Vec<ApiEndpoint>,
    #[serde(default)]
    pub ui_elements: Vec<UiElement>,
    /// True when at least one artifact failed to analyze and the
    /// representation is known to be incomplete.
    #[serde(default)]
    pub partial: bool,
}

impl Representation {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
            && self.data_structures.is_empty()
            && self.endpoints.is_empty()
            && self.ui_elements.is_empty()
    }

    pub fn element_count(&self) -> usize {
        self.functions.len()
            + self.data_structures.len()
            + self.endpoints.len()
            + self.ui_elements.len()
    }

    /// Concatenate another partial representation onto this one, in input
    /// order. Deduplication is the comparator's job, not the merger's.
    pub fn merge(&mut self, other: Representation) {
        self.functions.extend(other.functions);
        self.data_structures.extend(other.data_structures);
        self.endpoints.extend(other.endpoints);
        self.ui_elements.extend(other.ui_elements);
        self.partial |= other.partial;
    }

    /// Element identifiers must be locally unique per representation.
    /// Duplicate identifiers from distinct files get a positional suffix.
    pub fn disambiguate_ids(&mut self) {
        let mut seen = std::collections::HashMap::new();
        for elem in &mut self.ui_elements {
            let count = seen.entry(elem.id.clone()).or_insert(0usize);
            *count += 1;
            if *count > 1 {
                elem.id = format!("{}__{}", elem.id, *count);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ui(id: &str) -> UiElement {
        UiElement {
            kind: "input".to_string(),
            id: id.to_string(),
            text: None,
            attributes: BTreeMap::new(),
            analysis_method: AnalysisMethod::RegexFallback,
        }
    }

    #[test]
    fn merge_preserves_input_order() {
        let mut left = Representation {
            ui_elements: vec![ui("a"), ui("b")],
            ..Default::default()
        };
        let right = Representation {
            ui_elements: vec![ui("c")],
            partial: true,
            ..Default::default()
        };
        left.merge(right);
        let ids: Vec<_> = left.ui_elements.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(left.partial);
    }

    #[test]
    fn duplicate_ids_get_suffixed() {
        let mut rep = Representation {
            ui_elements: vec![ui("submit"), ui("submit"), ui("other")],
            ..Default::default()
        };
        rep.disambiguate_ids();
        let ids: Vec<_> = rep.ui_elements.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["submit", "submit__2", "other"]);
    }
}
