use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::fingerprint::Fingerprint;

/// Which aspects of the migration a session validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationScope {
    Ui,
    BackendLogic,
    DataStructure,
    Api,
    BusinessRules,
    Behavioral,
    Full,
}

impl ValidationScope {
    pub const ALL: [ValidationScope; 7] = [
        ValidationScope::Ui,
        ValidationScope::BackendLogic,
        ValidationScope::DataStructure,
        ValidationScope::Api,
        ValidationScope::BusinessRules,
        ValidationScope::Behavioral,
        ValidationScope::Full,
    ];

    /// Scopes that require a behavioral stage (and therefore URLs and
    /// scenarios in the request).
    pub fn requires_behavioral(&self) -> bool {
        matches!(self, ValidationScope::Behavioral | ValidationScope::Full)
    }

    /// Scopes that run the static pipeline at all.
    pub fn requires_static(&self) -> bool {
        !matches!(self, ValidationScope::Behavioral)
    }
}

impl fmt::Display for ValidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationScope::Ui => "ui",
            ValidationScope::BackendLogic => "backend-logic",
            ValidationScope::DataStructure => "data-structure",
            ValidationScope::Api => "api",
            ValidationScope::BusinessRules => "business-rules",
            ValidationScope::Behavioral => "behavioral",
            ValidationScope::Full => "full",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ValidationScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ui" | "ui-layout" => Ok(ValidationScope::Ui),
            "backend-logic" | "backend" => Ok(ValidationScope::BackendLogic),
            "data-structure" | "data" => Ok(ValidationScope::DataStructure),
            "api" | "api-endpoints" => Ok(ValidationScope::Api),
            "business-rules" => Ok(ValidationScope::BusinessRules),
            "behavioral" => Ok(ValidationScope::Behavioral),
            "full" | "full-system" => Ok(ValidationScope::Full),
            other => Err(format!("unknown validation scope: {}", other)),
        }
    }
}

/// Severity of a single discrepancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Temperature band for an LLM request. Low-band requests are
/// deterministic enough to cache; medium/high are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureBand {
    Low,
    Medium,
    High,
}

impl TemperatureBand {
    pub fn cacheable(&self) -> bool {
        matches!(self, TemperatureBand::Low)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemperatureBand::Low => "low",
            TemperatureBand::Medium => "medium",
            TemperatureBand::High => "high",
        }
    }

    /// Sampling temperature handed to providers.
    pub fn temperature(&self) -> f32 {
        match self {
            TemperatureBand::Low => 0.1,
            TemperatureBand::Medium => 0.5,
            TemperatureBand::High => 0.9,
        }
    }
}

/// Source or target side of the migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Technology context for one side of a migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnologyContext {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub framework_details: HashMap<String, String>,
}

impl TechnologyContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            framework_details: HashMap::new(),
        }
    }
}

/// Language detected for a code artifact, by file extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    CSharp,
    Php,
    Html,
    Other(String),
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let ext = path.rsplit('.').next().unwrap_or("").to_lowercase();
        match ext.as_str() {
            "py" => Language::Python,
            "js" | "jsx" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "java" => Language::Java,
            "cs" => Language::CSharp,
            "php" => Language::Php,
            "html" | "htm" | "vue" => Language::Html,
            other => Language::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::CSharp => "csharp",
            Language::Php => "php",
            Language::Html => "html",
            Language::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One uploaded code file. `content` is read into memory at intake; the
/// fingerprint is computed once over path, language and bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeFile {
    pub path: String,
    pub language: Language,
    pub content: String,
    pub fingerprint: Fingerprint,
}

impl CodeFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        let language = Language::from_path(&path);
        let fingerprint = Fingerprint::for_file(&path, &language, content.as_bytes());
        Self {
            path,
            language,
            content,
            fingerprint,
        }
    }
}

/// Reference to an uploaded screenshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenshotRef {
    pub path: String,
    pub fingerprint: Fingerprint,
}

/// The artifacts for one side of a validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputBundle {
    #[serde(default)]
    pub files: Vec<CodeFile>,
    #[serde(default)]
    pub screenshots: Vec<ScreenshotRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InputBundle {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.screenshots.is_empty() && self.url.is_none()
    }

    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(|f| f.content.len()).sum()
    }

    pub fn artifact_count(&self) -> usize {
        self.files.len() + self.screenshots.len()
    }
}

/// Credentials for authenticated behavioral probing. Held in memory only:
/// never persisted, never logged, redacted from Debug and serialization.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Serialize for Credentials {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Credentials", 2)?;
        s.serialize_field("username", &self.username)?;
        s.serialize_field("password", "***")?;
        s.end()
    }
}

/// One behavioral scenario: either a named template ("login",
/// "form_submission") or an explicit action sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioAction {
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Navigate,
    Click,
    Fill,
    Submit,
    Wait,
    Capture,
}

/// Behavioral configuration attached to a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehavioralSpec {
    #[serde(default)]
    pub scenarios: Vec<ScenarioSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Per-scenario deadline in seconds.
    #[serde(default = "default_scenario_timeout")]
    pub scenario_timeout_secs: u64,
}

fn default_scenario_timeout() -> u64 {
    120
}

/// Priority band for scheduler admission. Interactive drains strictly
/// before batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityBand {
    Interactive,
    Batch,
}
