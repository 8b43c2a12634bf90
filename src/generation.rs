//! Text generation backends used by node execution.

use async_trait::async_trait;

/// Turns a prompt into generated text.
///
/// Any backend failure (transport, quota, unparseable reply) is reported as an
/// error; callers translate it into `GenerationFailed`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

#[cfg(feature = "gemini")]
pub use gemini::GeminiGenerator;

#[cfg(feature = "gemini")]
mod gemini {
    use std::time::Duration;

    use anyhow::{Context, anyhow};
    use async_trait::async_trait;
    use reqwest::{Client, StatusCode};
    use serde::{Deserialize, Serialize};

    use super::TextGenerator;
    use crate::config::DEFAULT_GEMINI_MODEL;

    const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
    const API_KEY_HEADER: &str = "x-goog-api-key";

    /// Calls the Gemini `generateContent` REST endpoint.
    #[derive(Clone)]
    pub struct GeminiGenerator {
        client: Client,
        api_key: String,
        model: String,
        base_url: String,
    }

    impl GeminiGenerator {
        pub fn new(api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .context("failed to build Gemini HTTP client")?;
            Ok(Self {
                client,
                api_key: api_key.into(),
                model: DEFAULT_GEMINI_MODEL.to_string(),
                base_url: BASE_URL.to_string(),
            })
        }

        pub fn with_model(mut self, model: impl Into<String>) -> Self {
            self.model = model.into();
            self
        }

        pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
            self.base_url = base_url.into();
            self
        }

        pub fn model(&self) -> &str {
            &self.model
        }
    }

    #[async_trait]
    impl TextGenerator for GeminiGenerator {
        async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
            let url = format!(
                "{}/{model}:generateContent",
                self.base_url.trim_end_matches('/'),
                model = self.model,
            );
            let body = GenerateContentRequest {
                contents: vec![Content {
                    role: "user".to_string(),
                    parts: vec![Part {
                        text: prompt.to_string(),
                    }],
                }],
                generation_config: GenerationConfig { seed: 0 },
            };

            let response = self
                .client
                .post(url)
                .header(API_KEY_HEADER, &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|err| anyhow!("Gemini API request failed: {}", err.without_url()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
                return Err(anyhow!(http_error_message(status, &body_text)));
            }

            let parsed: GenerateContentResponse = response
                .json()
                .await
                .map_err(|err| anyhow!("Failed to parse Gemini response: {}", err.without_url()))?;

            extract_text_response(parsed)
        }
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct GenerateContentRequest {
        contents: Vec<Content>,
        generation_config: GenerationConfig,
    }

    #[derive(Serialize)]
    struct GenerationConfig {
        seed: i64,
    }

    #[derive(Serialize)]
    struct Content {
        role: String,
        parts: Vec<Part>,
    }

    #[derive(Serialize)]
    struct Part {
        text: String,
    }

    #[derive(Deserialize)]
    pub(super) struct GenerateContentResponse {
        candidates: Option<Vec<Candidate>>,
    }

    #[derive(Deserialize)]
    struct Candidate {
        content: Option<ContentResponse>,
    }

    #[derive(Deserialize)]
    struct ContentResponse {
        parts: Vec<PartResponse>,
    }

    #[derive(Deserialize)]
    struct PartResponse {
        text: Option<String>,
    }

    #[derive(Deserialize)]
    struct ErrorWrapper {
        error: ErrorBody,
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        status: Option<String>,
    }

    pub(super) fn extract_text_response(
        response: GenerateContentResponse,
    ) -> anyhow::Result<String> {
        response
            .candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().find_map(|part| part.text))
            .ok_or_else(|| anyhow!("Gemini API returned no text in the response candidates"))
    }

    pub(super) fn http_error_message(status: StatusCode, body: &str) -> String {
        let detail = serde_json::from_str::<ErrorWrapper>(body)
            .map(|wrapper| {
                let status_text = wrapper.error.status.unwrap_or_default();
                let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
                if status_text.is_empty() {
                    msg
                } else {
                    format!("{status_text}: {msg}")
                }
            })
            .unwrap_or_else(|_| body.to_string());
        format!("Gemini API returned {}: {detail}", status.as_u16())
    }
}

#[cfg(all(test, feature = "gemini"))]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use serde_json::json;

    use super::TextGenerator;
    use super::gemini::{
        GeminiGenerator, GenerateContentResponse, extract_text_response, http_error_message,
    };

    #[test]
    fn extracts_first_text_part() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [
                {"content": {"parts": [{"inlineData": {}}, {"text": "hello"}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }))
        .expect("deserialize");
        assert_eq!(extract_text_response(response).expect("text"), "hello");
    }

    #[test]
    fn missing_candidates_is_an_error() {
        let response: GenerateContentResponse =
            serde_json::from_value(json!({})).expect("deserialize");
        assert!(extract_text_response(response).is_err());
    }

    #[test]
    fn error_body_is_summarized() {
        let message = http_error_message(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"code": 429, "message": "quota exceeded", "status": "RESOURCE_EXHAUSTED"}}"#,
        );
        assert_eq!(
            message,
            "Gemini API returned 429: RESOURCE_EXHAUSTED: quota exceeded"
        );
    }

    #[test]
    fn unparseable_error_body_is_passed_through() {
        let message = http_error_message(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(message, "Gemini API returned 502: upstream down");
    }

    #[tokio::test]
    async fn transport_errors_do_not_expose_api_key() {
        let generator = GeminiGenerator::new("SUPERSECRETKEY", Duration::from_secs(2))
            .expect("client")
            .with_base_url("http://127.0.0.1:1/v1beta/models");

        let err = generator
            .generate("hello")
            .await
            .expect_err("nothing listens on port 1");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("Gemini API request failed"), "{rendered}");
        assert!(!rendered.contains("SUPERSECRETKEY"), "{rendered}");
        assert!(!rendered.contains("127.0.0.1:1"), "{rendered}");
    }
}
