use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::AgentError;
use inbox_llm::LlmConfig;

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "INBOX_PILOT_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub imap: ImapConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub policy: RunPolicy,

    #[serde(default)]
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// IMAP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    /// IMAP server hostname
    #[serde(default = "default_imap_host")]
    pub host: String,

    /// IMAP server port (implicit TLS)
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Mailbox to read, opened read-only
    #[serde(default = "default_mailbox")]
    pub mailbox: String,

    /// IMAP SEARCH criteria selecting candidate messages
    #[serde(default = "default_search")]
    pub search: String,

    /// Budget for TCP connect + TLS handshake + LOGIN
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Retry, timeout and sizing policy for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPolicy {
    /// Max messages taken per run
    #[serde(default = "default_fetch_cap")]
    pub fetch_cap: usize,

    /// Classification attempts per message, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Wall-clock budget from lock acquisition to commit
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// Classification calls in flight at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// Characters of body kept as the stored excerpt
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Environment variable holding the credential encryption secret
    #[serde(default = "default_secret_env")]
    pub secret_env: String,
}

fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inbox-pilot")
        .join("inbox-pilot.db")
}

fn default_imap_host() -> String {
    "imap.gmail.com".into()
}

fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".into()
}

fn default_search() -> String {
    "UNSEEN".into()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_fetch_cap() -> usize {
    25
}

fn default_max_attempts() -> u32 {
    2
}

fn default_call_timeout() -> u64 {
    30
}

fn default_run_timeout() -> u64 {
    180
}

fn default_concurrency() -> usize {
    4
}

fn default_retry_base_delay() -> u64 {
    500
}

fn default_retry_max_delay() -> u64 {
    8_000
}

fn default_excerpt_chars() -> usize {
    280
}

fn default_secret_env() -> String {
    "INBOX_PILOT_SECRET".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: default_imap_host(),
            port: default_imap_port(),
            mailbox: default_mailbox(),
            search: default_search(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl ImapConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            fetch_cap: default_fetch_cap(),
            max_attempts: default_max_attempts(),
            call_timeout_secs: default_call_timeout(),
            run_timeout_secs: default_run_timeout(),
            concurrency: default_concurrency(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl RunPolicy {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.fetch_cap == 0 {
            return Err(AgentError::Config("policy.fetch_cap must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(AgentError::Config("policy.max_attempts must be at least 1".into()));
        }
        if self.concurrency == 0 {
            return Err(AgentError::Config("policy.concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            secret_env: default_secret_env(),
        }
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        paths.push(PathBuf::from(explicit));
    }

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("inbox-pilot").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".inbox-pilot.toml"));
    }

    paths
}

/// Load configuration from the first default path that exists.
pub fn load_config() -> Result<AppConfig, AgentError> {
    for path in default_config_paths() {
        if path.exists() {
            return load_config_from_path(&path);
        }
    }

    info!("No config file found, using defaults");
    Ok(AppConfig::default())
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AgentError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| AgentError::Config(format!("Failed to read config: {}", e)))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| AgentError::Config(format!("Failed to parse config: {}", e)))?;

    config.policy.validate()?;
    Ok(config)
}
