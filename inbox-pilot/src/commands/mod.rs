//! CLI command handlers
//!
//! Commands are thin wrappers that delegate to services. Each returns a
//! serializable value that the binary prints as JSON.
//!
//! ## Module Organization
//!
//! - `users`: signup and settings
//! - `run`: trigger a run
//! - `briefing`: read the latest briefing

pub mod briefing;
pub mod run;
pub mod users;

use std::sync::Arc;

use tracing::info;

use crate::adapters::imap::ImapMailbox;
use crate::adapters::ollama::OllamaClassifier;
use crate::adapters::sqlite::{pool, SqliteGateway};
use crate::config::AppConfig;
use crate::encryption::CredentialVault;
use crate::error::AgentError;
use crate::services::coordinator::RunCoordinator;
use crate::services::users::UserDirectory;
use inbox_llm::OllamaBackend;

/// Everything a command needs, wired from configuration.
pub struct AppContext {
    pub config: AppConfig,
    pub directory: UserDirectory,
    pub coordinator: RunCoordinator,
}

impl AppContext {
    pub fn from_config(config: AppConfig) -> Result<Self, AgentError> {
        let pool = pool::create_pool(&config.storage.db_path)?;
        info!("Database ready at {:?}", config.storage.db_path);

        let vault = Arc::new(CredentialVault::from_env(&config.vault.secret_env)?);

        let backend = OllamaBackend::from_config(&config.llm);
        if backend.is_none() {
            tracing::warn!("Ollama is disabled; every message will be marked errored");
        }
        let classifier = OllamaClassifier::new(backend, &config.llm);

        let coordinator = RunCoordinator::new(
            Arc::new(SqliteGateway::new(pool.clone())),
            Arc::new(ImapMailbox::new(config.imap.clone())),
            Arc::new(classifier),
            Arc::clone(&vault),
            config.policy.clone(),
        );

        Ok(Self {
            directory: UserDirectory::new(pool, vault),
            coordinator,
            config,
        })
    }
}
