//! Mail retrieval seam.
//!
//! The coordinator only sees these traits. The IMAP implementation lives in
//! `adapters::imap`; tests substitute an in-memory mailbox.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::AgentError;
use crate::types::{MailCredential, RawMessage};

#[derive(Debug, Clone, Error)]
pub enum MailboxError {
    /// The server rejected the credential.
    #[error("mailbox rejected credential: {0}")]
    Auth(String),

    /// Network, TLS or connect timeout.
    #[error("mailbox unreachable: {0}")]
    Connection(String),

    /// The server answered something we could not use.
    #[error("mailbox protocol error: {0}")]
    Protocol(String),
}

impl From<MailboxError> for AgentError {
    fn from(e: MailboxError) -> Self {
        match e {
            MailboxError::Auth(msg) => AgentError::Auth(msg),
            MailboxError::Connection(msg) | MailboxError::Protocol(msg) => {
                AgentError::Connection(msg)
            }
        }
    }
}

#[async_trait]
pub trait MailboxClient: Send + Sync {
    async fn connect(&self, credential: &MailCredential) -> Result<Box<dyn MailSession>, MailboxError>;
}

/// One authenticated session, owned by a single run.
#[async_trait]
pub trait MailSession: Send {
    /// Up to `cap` candidate messages, newest first.
    async fn fetch_recent(&mut self, cap: usize) -> Result<Vec<RawMessage>, MailboxError>;

    async fn logout(&mut self) -> Result<(), MailboxError>;
}
