//! Report generation: prompt construction, the external text generator and
//! extraction of the structured report from its reply

pub mod extract;
pub mod gemini;
pub mod prompt;

pub use extract::{extract_report, GeneratedReport};
pub use gemini::{GeminiClient, ModelDescriptor};
pub use prompt::build_prompt;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Message returned when the request body is absent or not JSON
pub const NO_JSON_MESSAGE: &str = "No JSON data provided";

/// Message returned when one of the request documents is missing
pub const MISSING_FIELDS_MESSAGE: &str =
    "Missing analysisResults, patientInfo, or conditionsMetadata in request body";

/// A text generation backend
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Model identifier used for generation
    fn model_name(&self) -> &str;

    /// Generate a free-text reply for `prompt`. One attempt, no retries.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// The three documents a report request carries
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRequest {
    pub analysis_results: Value,
    pub patient_info: Value,
    pub conditions_metadata: Value,
}

impl ReportRequest {
    /// Validate a decoded request body
    ///
    /// An absent or empty body and absent, null or empty documents are all
    /// rejected as invalid input.
    pub fn from_body(body: Option<Value>) -> Result<Self> {
        let mut body = match body {
            Some(Value::Object(map)) if !map.is_empty() => map,
            Some(v) if prompt::is_truthy(&v) => {
                return Err(Error::invalid_input(MISSING_FIELDS_MESSAGE))
            }
            _ => return Err(Error::invalid_input(NO_JSON_MESSAGE)),
        };

        let mut take = |key: &str| body.remove(key).filter(prompt::is_truthy);
        match (
            take("analysisResults"),
            take("patientInfo"),
            take("conditionsMetadata"),
        ) {
            (Some(analysis_results), Some(patient_info), Some(conditions_metadata)) => Ok(Self {
                analysis_results,
                patient_info,
                conditions_metadata,
            }),
            _ => Err(Error::invalid_input(MISSING_FIELDS_MESSAGE)),
        }
    }
}

/// Builds prompts, calls the generator and extracts the report
#[derive(Clone)]
pub struct ReportComposer {
    generator: Arc<dyn ReportGenerator>,
}

impl std::fmt::Debug for ReportComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportComposer")
            .field("model", &self.generator.model_name())
            .finish()
    }
}

impl ReportComposer {
    pub fn new(generator: Arc<dyn ReportGenerator>) -> Self {
        Self { generator }
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    pub async fn compose(&self, request: &ReportRequest) -> Result<GeneratedReport> {
        let prompt = build_prompt(
            &request.analysis_results,
            &request.patient_info,
            &request.conditions_metadata,
        )?;
        debug!("Report prompt:\n{}", prompt);

        let reply = self.generator.generate(&prompt).await?;
        debug!("Raw generator reply:\n{}", reply);

        extract_report(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Canned {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReportGenerator for Canned {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts
                .lock()
                .expect("test: lock")
                .push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn request() -> ReportRequest {
        ReportRequest::from_body(Some(json!({
            "analysisResults": {"condition": "effusion", "confidence": 0.42},
            "patientInfo": {"id": "P-9"},
            "conditionsMetadata": {
                "effusion": {"label": "Effusion", "description": "Fluid", "severity": "medium"}
            }
        })))
        .expect("test: request")
    }

    #[test]
    fn test_request_validation() {
        let invalid = |body: Option<Value>| match ReportRequest::from_body(body) {
            Err(Error::InvalidInput(msg)) => msg,
            other => panic!("expected InvalidInput, got {:?}", other),
        };

        assert_eq!(invalid(None), NO_JSON_MESSAGE);
        assert_eq!(invalid(Some(json!({}))), NO_JSON_MESSAGE);
        assert_eq!(
            invalid(Some(json!({"analysisResults": {"condition": "x"}, "patientInfo": {"id": 1}}))),
            MISSING_FIELDS_MESSAGE
        );
        assert_eq!(
            invalid(Some(json!({
                "analysisResults": {"condition": "x"},
                "patientInfo": null,
                "conditionsMetadata": {"x": {}}
            }))),
            MISSING_FIELDS_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_compose_round_trip() {
        let generator = Arc::new(Canned {
            reply: "```json\n{\"summary\": \"S\", \"findings\": \"F\", \"impression\": \"I\", \"recommendations\": \"R\"}\n```".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let composer = ReportComposer::new(generator.clone());

        let report = composer.compose(&request()).await.expect("test: compose");
        assert_eq!(report.impression, "I");

        let prompts = generator.prompts.lock().expect("test: lock");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("- Confidence Level: 42.0%"));
    }

    #[tokio::test]
    async fn test_compose_surfaces_parse_errors() {
        let composer = ReportComposer::new(Arc::new(Canned {
            reply: "no json here".to_string(),
            prompts: Mutex::new(Vec::new()),
        }));
        assert!(matches!(
            composer.compose(&request()).await,
            Err(Error::ReportParse { .. })
        ));
    }
}
