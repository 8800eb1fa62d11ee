//! Agent error type
//!
//! Every operation that crosses the library boundary (a run, a settings
//! change, a briefing read) returns [`AgentError`]. Errors serialize as
//! `{"type": ..., "message": ...}` so the surrounding application can map
//! [`AgentError::code`] to user-facing copy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum AgentError {
    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("A run is already in progress for user {0}")]
    AlreadyRunning(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl AgentError {
    /// Stable machine-readable code for the trigger's response.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Credential(_) => "CREDENTIAL_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Conflict(_) => "CONFLICT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl From<r2d2::Error> for AgentError {
    fn from(e: r2d2::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Parse(err.to_string())
    }
}
