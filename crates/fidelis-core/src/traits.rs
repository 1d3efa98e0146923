use async_trait::async_trait;

use crate::error::Result;
use crate::representation::Representation;
use crate::types::{CodeFile, ScreenshotRef, ValidationScope};

/// Extracts an abstract representation from one code file. Implementations
/// are selected from a registry indexed by language; no inheritance
/// hierarchy is involved.
#[async_trait]
pub trait CodeAnalyzer: Send + Sync {
    /// Languages this analyzer accepts, as catalog strings.
    fn languages(&self) -> &[&'static str];

    async fn analyze(&self, file: &CodeFile, scope: ValidationScope) -> Result<Representation>;
}

/// Extracts UI elements from a screenshot.
#[async_trait]
pub trait VisualAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        screenshot: &ScreenshotRef,
        scope: ValidationScope,
    ) -> Result<Representation>;
}
