#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Ollama error: {0}")]
    OllamaError(String),

    #[error("Ollama is not configured")]
    OllamaNotConfigured,

    #[error("Ollama request timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, Error>;
