use std::collections::HashMap;
use std::sync::Arc;

use fidelis_core::{CodeAnalyzer, FidelisError, Language, Result, VisualAnalyzer};

use crate::code::RegexCodeAnalyzer;

/// Analyzer lookup indexed by language string. Selection is a plain map,
/// not a hierarchy.
pub struct AnalyzerRegistry {
    code: HashMap<String, Arc<dyn CodeAnalyzer>>,
    visual: Option<Arc<dyn VisualAnalyzer>>,
}

impl AnalyzerRegistry {
    pub fn empty() -> Self {
        Self {
            code: HashMap::new(),
            visual: None,
        }
    }

    /// Registry with the built-in pattern analyzer covering every catalog
    /// language. A visual analyzer is attached separately because it needs
    /// a dispatcher.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register_code(Arc::new(RegexCodeAnalyzer));
        registry
    }

    pub fn register_code(&mut self, analyzer: Arc<dyn CodeAnalyzer>) {
        for language in analyzer.languages() {
            self.code.insert(language.to_string(), Arc::clone(&analyzer));
        }
    }

    pub fn register_visual(&mut self, analyzer: Arc<dyn VisualAnalyzer>) {
        self.visual = Some(analyzer);
    }

    pub fn code_analyzer(&self, language: &Language) -> Result<Arc<dyn CodeAnalyzer>> {
        self.code
            .get(language.as_str())
            .cloned()
            .or_else(|| self.code.get("html").cloned())
            .ok_or_else(|| {
                FidelisError::ValidationInput(format!("unsupported language: {}", language))
            })
    }

    pub fn visual_analyzer(&self) -> Result<Arc<dyn VisualAnalyzer>> {
        self.visual
            .clone()
            .ok_or_else(|| FidelisError::Configuration("no visual analyzer registered".into()))
    }
}
