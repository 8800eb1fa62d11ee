use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama URL. Default: "http://localhost:11434".
    /// Set to null in config to start with Ollama disabled.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: Option<String>,

    /// API key sent as a bearer token. Default: None (no auth).
    #[serde(default)]
    pub ollama_api_key: Option<String>,

    /// Model used for classification and drafting.
    #[serde(default = "default_model")]
    pub model: String,

    /// HTTP timeout in seconds. Default: 120.
    /// The agent enforces its own, usually shorter, per-call timeout on top.
    #[serde(default = "default_timeout")]
    pub ollama_timeout_secs: u64,

    /// Sampling temperature. Default: 0.2.
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Max tokens per answer. Default: 400 (room for a short draft).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
}

fn default_ollama_url() -> Option<String> {
    Some("http://localhost:11434".into())
}

fn default_model() -> String {
    "mistral:latest".into()
}

fn default_timeout() -> u64 {
    120
}

fn default_temperature() -> f64 {
    0.2
}

fn default_max_tokens() -> Option<u32> {
    Some(400)
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            ollama_api_key: None,
            model: default_model(),
            ollama_timeout_secs: default_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}
