//! Gemini Image Generator
//!
//! Implementation of `ImageGenerator` over the Gemini `generateContent`
//! REST endpoint. The source image goes up as an inline base64 part next to
//! the prompt; the portrait comes back as an inline part of the first
//! candidate.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rexpet_core::{
    CoreError, GeneratedImage, GenerationInput, GeneratorInfo, ImageGenerator, Result,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

/// Gemini provider configuration
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,

    /// API root, without the `/v1beta` suffix
    pub base_url: String,

    pub model: String,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            timeout_secs: 120,
        }
    }

    /// Read `GEMINI_*` variables; `None` when no API key is configured
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        let mut config = Self::new(api_key);

        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config.base_url = base_url;
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.model = model;
        }
        if let Some(timeout) = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|t| t.parse().ok())
        {
            config.timeout_secs = timeout;
        }

        Some(config)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    #[serde(rename_all = "camelCase")]
    Image { inline_data: InlineData },
    Text { text: &'a str },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 2],
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

impl GenerateResponse {
    /// First inline image part of the first candidate
    fn into_image(self) -> Result<GeneratedImage> {
        let inline = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.inline_data))
            .ok_or_else(|| CoreError::Upstream("No image in Gemini response".into()))?;

        let bytes = STANDARD
            .decode(inline.data.as_bytes())
            .map_err(|e| CoreError::Upstream(format!("Invalid image encoding: {e}")))?;

        Ok(GeneratedImage {
            bytes,
            mime_type: inline.mime_type,
        })
    }
}

/// Gemini image generator
pub struct GeminiGenerator {
    client: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiGenerator {
    pub fn from_config(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CoreError::Upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn model_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

fn request_error(e: &reqwest::Error) -> CoreError {
    if e.is_timeout() {
        CoreError::Upstream("Gemini request timed out".into())
    } else {
        CoreError::Upstream(format!("Gemini request failed: {e}"))
    }
}

#[async_trait]
impl ImageGenerator for GeminiGenerator {
    async fn generate(&self, input: &GenerationInput) -> Result<GeneratedImage> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Image {
                        inline_data: InlineData {
                            mime_type: input.mime_type.clone(),
                            data: STANDARD.encode(&input.image),
                        },
                    },
                    RequestPart::Text {
                        text: &input.prompt,
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: ["TEXT", "IMAGE"],
            },
        };

        let response = self
            .client
            .post(format!("{}:generateContent", self.model_url()))
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(&e))?;

        let status = response.status();
        tracing::debug!(status = %status, model = %self.config.model, "Gemini response received");

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CoreError::Upstream(format!(
                "Gemini API error ({status}): {text}"
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Upstream(format!("Failed to parse Gemini response: {e}")))?;

        parsed.into_image()
    }

    async fn health_check(&self) -> Result<bool> {
        match self
            .client
            .get(self.model_url())
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("Gemini health check failed: {}", e);
                Ok(false)
            }
        }
    }

    fn info(&self) -> GeneratorInfo {
        GeneratorInfo {
            name: "Gemini".into(),
            model: self.config.model.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_generator(base_url: &str) -> GeminiGenerator {
        let mut config = GeminiConfig::new("test-key");
        config.base_url = base_url.to_string();
        config.timeout_secs = 5;
        GeminiGenerator::from_config(config).unwrap()
    }

    fn test_input() -> GenerationInput {
        GenerationInput {
            image: vec![0xFF, 0xD8, 0xFF, 0xE0],
            mime_type: "image/jpeg".into(),
            prompt: "Renaissance oil portrait".into(),
        }
    }

    const GENERATE_PATH: &str = "/v1beta/models/gemini-2.0-flash-exp:generateContent";

    #[tokio::test]
    async fn generate_extracts_inline_image() {
        let server = MockServer::start().await;
        let png = vec![0x89, b'P', b'N', b'G'];

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [
                        { "text": "Here is your portrait" },
                        { "inlineData": { "mimeType": "image/png", "data": STANDARD.encode(&png) } }
                    ]}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let image = test_generator(&server.uri())
            .generate(&test_input())
            .await
            .unwrap();

        assert_eq!(image.bytes, png);
        assert_eq!(image.mime_type, "image/png");
    }

    #[tokio::test]
    async fn request_carries_image_and_prompt() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(body_partial_json(serde_json::json!({
                "contents": [{ "parts": [
                    { "inlineData": { "mimeType": "image/jpeg", "data": STANDARD.encode(test_input().image) } },
                    { "text": "Renaissance oil portrait" }
                ]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": STANDARD.encode(b"ok") } }
                ]}}]
            })))
            .mount(&server)
            .await;

        let result = test_generator(&server.uri()).generate(&test_input()).await;
        assert!(result.is_ok(), "body should match: {result:?}");
    }

    #[tokio::test]
    async fn text_only_response_is_upstream_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": "I cannot do that" }] } }]
            })))
            .mount(&server)
            .await;

        let err = test_generator(&server.uri())
            .generate(&test_input())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Upstream("No image in Gemini response".into()));
    }

    #[tokio::test]
    async fn api_error_is_upstream_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_generator(&server.uri())
            .generate(&test_input())
            .await
            .unwrap_err();
        match err {
            CoreError::Upstream(msg) => assert!(msg.contains("quota exceeded"), "got: {msg}"),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let mut config = GeminiConfig::new("test-key");
        config.base_url = server.uri();
        config.timeout_secs = 1;
        let generator = GeminiGenerator::from_config(config).unwrap();

        let err = generator.generate(&test_input()).await.unwrap_err();
        assert_eq!(err, CoreError::Upstream("Gemini request timed out".into()));
    }

    #[tokio::test]
    async fn health_check_reports_reachability() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1beta/models/gemini-2.0-flash-exp"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        assert!(test_generator(&server.uri()).health_check().await.unwrap());
        assert!(!test_generator("http://127.0.0.1:9").health_check().await.unwrap());
    }
}
