use serde::{Deserialize, Serialize};

/// Output format requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    Text,
    /// Ollama constrains decoding to valid JSON
    Json,
}

/// Input to `generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model name, e.g. "mistral:latest". An "ollama:" prefix is accepted.
    pub model: String,

    /// The prompt text
    pub prompt: String,

    /// Sampling temperature (0.0-2.0)
    pub temperature: f64,

    /// Max tokens to generate. The server default applies if omitted.
    pub max_tokens: Option<u32>,

    pub format: ResponseFormat,
}

/// Output from `generate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The generated text
    pub text: String,

    /// The model that produced it, as reported by the server
    pub model: String,
}
