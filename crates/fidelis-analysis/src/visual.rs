use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fidelis_ai::{prompts, Dispatcher, LlmEnvelope};
use fidelis_core::{
    AnalysisMethod, Representation, Result, ScreenshotRef, TemperatureBand, UiElement,
    ValidationScope, VisualAnalyzer,
};

/// Visual analyzer backed by a vision-capable model behind the dispatcher.
/// The screenshot is referenced by fingerprint; the provider adapter is
/// responsible for attaching the image payload.
pub struct LlmVisualAnalyzer {
    dispatcher: Arc<Dispatcher>,
    call_timeout: Duration,
}

impl LlmVisualAnalyzer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            call_timeout: Duration::from_secs(120),
        }
    }
}

#[async_trait]
impl VisualAnalyzer for LlmVisualAnalyzer {
    async fn analyze(
        &self,
        screenshot: &ScreenshotRef,
        scope: ValidationScope,
    ) -> Result<Representation> {
        let mut envelope = LlmEnvelope::new(
            prompts::visual_extraction_prompt(&scope.to_string()),
            TemperatureBand::Low,
            Instant::now() + self.call_timeout,
        )
        .system(prompts::COMPARISON_SYSTEM);
        envelope
            .context
            .insert("screenshot".into(), screenshot.fingerprint.to_string());

        let (value, _reply) = self.dispatcher.ask_json(&envelope).await?;

        let mut rep = Representation::default();
        if let Some(elements) = value.get("elements").and_then(|e| e.as_array()) {
            for (index, element) in elements.iter().enumerate() {
                let kind = element
                    .get("kind")
                    .and_then(|k| k.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                let id = element
                    .get("id")
                    .and_then(|i| i.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}_{}", kind, index + 1));
                let text = element
                    .get("text")
                    .and_then(|t| t.as_str())
                    .map(str::to_string);
                let attributes: BTreeMap<String, String> = element
                    .get("attributes")
                    .and_then(|a| a.as_object())
                    .map(|map| {
                        map.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();
                rep.ui_elements.push(UiElement {
                    kind,
                    id,
                    text,
                    attributes,
                    analysis_method: AnalysisMethod::VisionModel,
                });
            }
        }
        rep.disambiguate_ids();
        Ok(rep)
    }
}
