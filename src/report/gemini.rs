//! Gemini `generateContent` client

use super::ReportGenerator;
use crate::config::ReportConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";
const API_VERSION: &str = "v1beta";

/// Harm categories whose blocking is disabled for report generation
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(prompt: &'a str) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_NONE",
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// A model visible to the configured credential
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

impl ModelDescriptor {
    pub fn supports_generate_content(&self) -> bool {
        self.supported_generation_methods
            .iter()
            .any(|m| m == "generateContent")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelDescriptor>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Client for the Gemini REST API
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Build a client; fails when no API key is configured
    pub fn new(config: &ReportConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::ServiceUnavailable("GEMINI_API_KEY is not set".to_string()))?;

        let mut key_value = HeaderValue::from_str(api_key)
            .map_err(|_| Error::ServiceUnavailable("API key is not a valid header value".to_string()))?;
        key_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(API_KEY_HEADER, key_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let model = config
            .model
            .strip_prefix("models/")
            .unwrap_or(&config.model)
            .to_string();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    /// Build a client and, if configured, log the models the key can reach
    ///
    /// A failed listing means the credential or endpoint is unusable, so it
    /// is reported as an error.
    pub async fn connect(config: &ReportConfig) -> Result<Self> {
        let client = Self::new(config)?;

        if config.list_models_on_startup {
            let models = client.list_models().await?;
            info!("Available Gemini models ({}):", models.len());
            for m in &models {
                if m.supports_generate_content() {
                    info!("- {} (Supports generateContent)", m.name);
                } else {
                    info!("- {}", m.name);
                }
            }
        }

        info!("Gemini model '{}' initialized", client.model);
        Ok(client)
    }

    fn models_url(&self) -> String {
        format!("{}/{}/models", self.base_url, API_VERSION)
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.base_url, API_VERSION, self.model
        )
    }

    /// List every model, following pagination
    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.client.get(self.models_url());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token)]);
            }

            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(Error::Generation(api_error_message(status, &body)));
            }

            let page: ListModelsResponse = serde_json::from_str(&body)?;
            models.extend(page.models);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(models)
    }
}

#[async_trait]
impl ReportGenerator for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(self.generate_url())
            .json(&GenerateContentRequest::new(prompt))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!("Gemini returned {}", status);
            return Err(Error::Generation(api_error_message(status, &body)));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)?;
        reply_text(parsed)
    }
}

fn reply_text(response: GenerateContentResponse) -> Result<String> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates returned".to_string());
        return Err(Error::Generation(format!("prompt was blocked: {}", reason)));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
        return Err(Error::Generation(format!(
            "reply contained no text (finish reason {})",
            reason
        )));
    }

    debug!("Gemini reply: {} bytes", text.len());
    Ok(text)
}

fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => match parsed.error.status {
            Some(code) => format!("{} {}: {}", status.as_u16(), code, parsed.error.message),
            None => format!("{}: {}", status.as_u16(), parsed.error.message),
        },
        Err(_) => format!("{}: {}", status.as_u16(), body.trim()),
    }
}
