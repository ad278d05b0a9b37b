use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::TranslationModel;
use crate::config::{GenerationConfig, TranslateConfig, batch_size_for_model};
use crate::error::{BookError, Result};

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationSettings,
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub response_mime_type: String,
}

impl From<&GenerationConfig> for GenerationSettings {
    fn from(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: config.top_k,
            max_output_tokens: config.max_output_tokens,
            response_mime_type: config.response_mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate, or the reason there is none.
    pub fn into_text(self) -> Result<String> {
        if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return Err(BookError::Translation(format!(
                "Prompt blocked by model: {}",
                reason.to_lowercase()
            )));
        }

        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| BookError::Translation("Model returned no candidates".to_string()))?;

        if candidate.finish_reason.as_deref() == Some("RECITATION") {
            return Err(BookError::Translation(
                "Response stopped: copyrighted content (recitation)".to_string(),
            ));
        }

        let text: String = candidate
            .content
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default();
        let text = text.trim();

        if text.is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
            return Err(BookError::Translation(format!(
                "Empty model response (finish reason: {})",
                reason.to_lowercase()
            )));
        }
        Ok(text.to_string())
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiModel {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    batch_size: usize,
    generation: GenerationSettings,
}

impl GeminiModel {
    pub fn new(config: &TranslateConfig, model: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            batch_size: batch_size_for_model(model),
            generation: GenerationSettings::from(&config.generation),
        })
    }

    fn build_request(&self, prompt: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: self.generation.clone(),
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|category| SafetySetting {
                    category: category.to_string(),
                    threshold: "BLOCK_NONE".to_string(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl TranslationModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        debug!("Sending generateContent request to: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.build_request(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BookError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| BookError::Translation(format!("Failed to parse model response: {}", e)))?;
        body.into_text()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::progress::FailureType;
    use httpmock::prelude::*;
    use serde_json::json;

    fn model_for(server: &MockServer) -> GeminiModel {
        let mut config = Config::default().translate;
        config.endpoint = server.base_url();
        GeminiModel::new(&config, "gemini-2.0-flash", "test-key").unwrap()
    }

    #[tokio::test]
    async fn test_generate_returns_joined_parts() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/gemini-2.0-flash:generateContent")
                    .header("x-goog-api-key", "test-key")
                    .body_contains("\"threshold\":\"BLOCK_NONE\"")
                    .body_contains("HARM_CATEGORY_HATE_SPEECH")
                    .body_contains("\"generationConfig\"")
                    .body_contains("\"topK\":64");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": [{"text": "Xin chào "}, {"text": "thế giới. "}]},
                        "finishReason": "STOP"
                    }]
                }));
            })
            .await;

        let model = model_for(&server);
        assert_eq!(model.batch_size(), 15);
        let text = model.generate("你好世界").await.unwrap();
        assert_eq!(text, "Xin chào thế giới.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient_api_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST);
                then.status(429).body("Resource has been exhausted");
            })
            .await;

        let err = model_for(&server).generate("x").await.unwrap_err();
        assert!(matches!(err, BookError::Api { status: 429, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_blocked_prompt_is_categorized() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}})).unwrap();
        let err = response.into_text().unwrap_err();
        assert_eq!(FailureType::categorize(&err.to_string()), FailureType::ProhibitedContent);
    }

    #[test]
    fn test_recitation_is_categorized_as_copyright() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "RECITATION"}]
        }))
        .unwrap();
        let err = response.into_text().unwrap_err();
        assert_eq!(FailureType::categorize(&err.to_string()), FailureType::CopyrightedContent);
    }

    #[test]
    fn test_empty_candidate_is_an_error() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "  "}]}, "finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();
        assert!(response.into_text().is_err());

        let none: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert!(none.into_text().is_err());
    }
}
