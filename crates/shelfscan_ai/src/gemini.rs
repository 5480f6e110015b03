//! Gemini REST client implementing the extractor capability.
//!
//! Transport failures are retried in-process with exponential backoff (3
//! attempts) before surfacing; anything past that is the job queue's
//! problem. A non-2xx status is not retried here except for 429/5xx, which
//! behave like transport failures.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::parse::parse_results;
use crate::{AiError, BarcodeExtractor, ExtractionResponse};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TRANSPORT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub temperature: f64,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            timeout: Duration::from_secs(120),
            max_output_tokens: 1024,
            temperature: 1.0,
        }
    }
}

pub struct GeminiExtractor {
    config: GeminiConfig,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 2],
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f64,
}

impl GeminiExtractor {
    pub fn new(config: GeminiConfig) -> Result<Self, AiError> {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Point the client at another endpoint; tests use a local mock server.
    pub fn with_base_url(config: GeminiConfig, base_url: &str) -> Result<Self, AiError> {
        if config.api_key.is_empty() {
            return Err(AiError::NotConfigured("missing API key"));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        )
    }

    async fn call_once(&self, body: &GenerateRequest<'_>) -> Result<Value, AiError> {
        let response = self.client.post(self.endpoint()).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }

    fn retryable(error: &AiError) -> bool {
        match error {
            AiError::Transport(_) => true,
            AiError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[async_trait]
impl BarcodeExtractor for GeminiExtractor {
    async fn extract(&self, image: &[u8], prompt: &str) -> Result<ExtractionResponse, AiError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = GenerateRequest {
            contents: [Content {
                parts: [
                    Part::Text { text: prompt },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: encoded,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.config.max_output_tokens,
                temperature: self.config.temperature,
            },
        };

        let mut delay = Duration::from_secs(2);
        let mut last_error = None;
        let mut payload = None;
        for attempt in 1..=TRANSPORT_ATTEMPTS {
            match self.call_once(&body).await {
                Ok(value) => {
                    payload = Some(value);
                    break;
                }
                Err(e) if Self::retryable(&e) && attempt < TRANSPORT_ATTEMPTS => {
                    warn!(attempt, error = %e, "AI call failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(10));
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        let payload = match payload {
            Some(p) => p,
            None => return Err(last_error.unwrap_or(AiError::EmptyResponse)),
        };

        let raw_text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if raw_text.is_empty() {
            return Err(AiError::EmptyResponse);
        }

        let tokens_used = payload["usageMetadata"]["totalTokenCount"].as_u64();
        let results = parse_results(&raw_text);
        debug!(
            candidates = results.len(),
            tokens = tokens_used.unwrap_or(0),
            "AI extraction parsed"
        );

        Ok(ExtractionResponse {
            results,
            raw_text,
            tokens_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn extractor(base_url: &str) -> GeminiExtractor {
        let mut config = GeminiConfig::new("test-key", "test-model");
        config.timeout = Duration::from_secs(5);
        GeminiExtractor::with_base_url(config, base_url).unwrap()
    }

    fn gemini_payload(text: &str, tokens: u64) -> serde_json::Value {
        serde_json::json!({
            "candidates": [
                {"content": {"parts": [{"text": text}]}}
            ],
            "usageMetadata": {"totalTokenCount": tokens}
        })
    }

    #[tokio::test]
    async fn extracts_and_validates_codes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/models/test-model:generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_payload(
                r#"[{"code":"5901234123457","symbologyGuess":"EAN-13","confidence":0.9}]"#,
                321,
            )))
            .mount(&server)
            .await;

        let response = extractor(&server.uri())
            .extract(b"jpeg-bytes", "read the barcode")
            .await
            .unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.valid_results().len(), 1);
        assert_eq!(response.results[0].code, "5901234123457");
        assert_eq!(response.tokens_used, Some(321));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(gemini_payload("[]", 10)),
            )
            .mount(&server)
            .await;

        let response = extractor(&server.uri())
            .extract(b"jpeg-bytes", "prompt")
            .await
            .unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.tokens_used, Some(10));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let err = extractor(&server.uri())
            .extract(b"jpeg-bytes", "prompt")
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Status { status: 403, .. }));
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let config = GeminiConfig::new("", "model");
        assert!(matches!(
            GeminiExtractor::new(config),
            Err(AiError::NotConfigured(_))
        ));
    }
}
