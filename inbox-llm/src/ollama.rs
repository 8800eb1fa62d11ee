use crate::models::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Immutable snapshot of an Ollama connection.
/// To change the URL/key/timeout, construct a new OllamaBackend.
pub struct OllamaBackend {
    client: Client,
    base_url: String,
}

// -- Ollama API wire types --

#[derive(Serialize)]
struct GenRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: GenOptions,
}

#[derive(Serialize)]
struct GenOptions {
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenResponse {
    response: Option<String>,
    model: Option<String>,
}

// -- Construction --

impl OllamaBackend {
    /// Build from individual parameters. Returns None if url is empty.
    pub fn new(url: &str, api_key: Option<&str>, timeout_secs: u64) -> Option<Self> {
        if url.is_empty() {
            return None;
        }

        let mut builder = Client::builder().timeout(Duration::from_secs(timeout_secs));

        if let Some(key) = api_key {
            let mut headers = reqwest::header::HeaderMap::new();
            if let Ok(val) = format!("Bearer {}", key).parse() {
                headers.insert(reqwest::header::AUTHORIZATION, val);
            }
            builder = builder.default_headers(headers);
        }

        let client = builder.build().ok()?;

        Some(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        })
    }

    /// Build from the static config. None means Ollama is disabled.
    pub fn from_config(config: &crate::config::LlmConfig) -> Option<Self> {
        let url = config.ollama_url.as_deref()?;
        Self::new(
            url,
            config.ollama_api_key.as_deref(),
            config.ollama_timeout_secs,
        )
    }

    // -- Public API --

    /// POST /api/generate with stream:false.
    pub async fn generate(&self, req: &GenerateRequest) -> crate::Result<GenerateResponse> {
        let model_name = req.model.strip_prefix("ollama:").unwrap_or(&req.model);

        let body = GenRequest {
            model: model_name,
            prompt: &req.prompt,
            stream: false,
            format: match req.format {
                ResponseFormat::Json => Some("json"),
                ResponseFormat::Text => None,
            },
            options: GenOptions {
                temperature: req.temperature.clamp(0.0, 2.0),
                num_predict: req.max_tokens,
            },
        };

        debug!(model = %model_name, prompt_len = req.prompt.len(), "Calling Ollama generate");

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    crate::Error::Timeout
                } else {
                    crate::Error::OllamaError(format!("request failed: {}", e))
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(crate::Error::OllamaError(format!(
                "HTTP {}: {}",
                status, text
            )));
        }

        let gen: GenResponse = resp
            .json()
            .await
            .map_err(|e| crate::Error::OllamaError(format!("parse failed: {}", e)))?;

        let text = gen.response.unwrap_or_default();
        if text.trim().is_empty() {
            return Err(crate::Error::GenerationFailed("empty response".into()));
        }

        Ok(GenerateResponse {
            text,
            model: gen.model.unwrap_or_else(|| model_name.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(format: ResponseFormat) -> GenerateRequest {
        GenerateRequest {
            model: "ollama:mistral:latest".into(),
            prompt: "Classify this".into(),
            temperature: 0.2,
            max_tokens: Some(50),
            format,
        }
    }

    #[tokio::test]
    async fn test_generate_strips_prefix_and_requests_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "mistral:latest",
                "stream": false,
                "format": "json"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "mistral:latest",
                "response": "{\"category\": \"fyi\"}",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri(), None, 5).unwrap();
        let resp = backend.generate(&request(ResponseFormat::Json)).await.unwrap();

        assert_eq!(resp.text, "{\"category\": \"fyi\"}");
        assert_eq!(resp.model, "mistral:latest");
    }

    #[tokio::test]
    async fn test_generate_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri(), None, 5).unwrap();
        let err = backend.generate(&request(ResponseFormat::Text)).await.unwrap_err();

        match err {
            crate::Error::OllamaError(msg) => assert!(msg.contains("500")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_generate_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "   "
            })))
            .mount(&server)
            .await;

        let backend = OllamaBackend::new(&server.uri(), None, 5).unwrap();
        let err = backend.generate(&request(ResponseFormat::Json)).await.unwrap_err();
        assert!(matches!(err, crate::Error::GenerationFailed(_)));
    }

    #[tokio::test]
    async fn test_generate_without_backend() {
        let err = crate::generate(None, &request(ResponseFormat::Json)).await.unwrap_err();
        assert!(matches!(err, crate::Error::OllamaNotConfigured));
    }

    #[test]
    fn test_empty_url_disables_backend() {
        assert!(OllamaBackend::new("", None, 5).is_none());

        let config = crate::LlmConfig {
            ollama_url: None,
            ..Default::default()
        };
        assert!(OllamaBackend::from_config(&config).is_none());
    }
}
