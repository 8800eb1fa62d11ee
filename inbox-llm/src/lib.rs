//! Text generation backend for the inbox agent.
//!
//! Talks to an Ollama server (`/api/generate`, non-streaming). The backend
//! is an immutable snapshot of one connection, built once from [`LlmConfig`].
//! An absent backend means generation is disabled.

mod config;
mod error;
mod models;
mod ollama;

pub use config::LlmConfig;
pub use error::{Error, Result};
pub use models::*;
pub use ollama::OllamaBackend;

/// Generate through an optional backend, failing if Ollama is disabled.
pub async fn generate(
    backend: Option<&OllamaBackend>,
    req: &GenerateRequest,
) -> Result<GenerateResponse> {
    let backend = backend.ok_or(Error::OllamaNotConfigured)?;
    backend.generate(req).await
}
