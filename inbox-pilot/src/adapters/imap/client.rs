use async_imap::types::Fetch;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::connection::{self, ImapSession};
use super::messages::parse_message;
use crate::config::ImapConfig;
use crate::services::mailbox::{MailSession, MailboxClient, MailboxError};
use crate::types::{MailCredential, RawMessage};

/// [`MailboxClient`] backed by an IMAP server.
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MailboxClient for ImapMailbox {
    async fn connect(&self, credential: &MailCredential) -> Result<Box<dyn MailSession>, MailboxError> {
        let timeout = self.config.connect_timeout();
        let session = tokio::time::timeout(
            timeout,
            connection::connect(
                &self.config.host,
                self.config.port,
                credential.username(),
                credential.password(),
            ),
        )
        .await
        .map_err(|_| {
            MailboxError::Connection(format!(
                "Connecting to {}:{} timed out after {}s",
                self.config.host,
                self.config.port,
                timeout.as_secs()
            ))
        })??;

        Ok(Box::new(ImapMailSession {
            session: Some(session),
            mailbox: self.config.mailbox.clone(),
            search: self.config.search.clone(),
        }))
    }
}

struct ImapMailSession {
    session: Option<ImapSession>,
    mailbox: String,
    search: String,
}

impl ImapMailSession {
    fn session(&mut self) -> Result<&mut ImapSession, MailboxError> {
        self.session
            .as_mut()
            .ok_or_else(|| MailboxError::Protocol("session already logged out".into()))
    }
}

#[async_trait]
impl MailSession for ImapMailSession {
    async fn fetch_recent(&mut self, cap: usize) -> Result<Vec<RawMessage>, MailboxError> {
        let mailbox = self.mailbox.clone();
        let search = self.search.clone();
        let session = self.session()?;

        // EXAMINE keeps the mailbox read-only, so nothing gets marked \Seen
        session
            .examine(&mailbox)
            .await
            .map_err(|e| MailboxError::Protocol(format!("EXAMINE {} failed: {}", mailbox, e)))?;

        let found = session
            .uid_search(&search)
            .await
            .map_err(|e| MailboxError::Protocol(format!("SEARCH {} failed: {}", search, e)))?;

        let uids = newest_uids(found, cap);
        if uids.is_empty() {
            info!(mailbox = %mailbox, "No messages matched {}", search);
            return Ok(Vec::new());
        }

        let uid_list = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let fetches = {
            let stream = session
                .uid_fetch(&uid_list, "(UID INTERNALDATE BODY.PEEK[])")
                .await
                .map_err(|e| MailboxError::Protocol(format!("FETCH failed: {}", e)))?;
            collect_tolerant(stream, "BODY.PEEK[]").await
        };

        let mut messages = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(uid) = fetch.uid else { continue };
            let Some(raw) = fetch.body() else {
                warn!(uid, "FETCH response carried no body");
                continue;
            };
            match parse_message(uid, raw, fetch.internal_date(), &mailbox) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!(uid, "Skipping message: {}", e),
            }
        }

        sort_newest_first(&mut messages);
        messages.truncate(cap);

        info!(mailbox = %mailbox, count = messages.len(), "Fetched messages");
        Ok(messages)
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        if let Some(mut session) = self.session.take() {
            session
                .logout()
                .await
                .map_err(|e| MailboxError::Connection(format!("LOGOUT failed: {}", e)))?;
            debug!("IMAP session closed");
        }
        Ok(())
    }
}

/// Collects a FETCH stream tolerantly: responses that fail to parse are
/// logged and skipped.
async fn collect_tolerant<E: std::fmt::Display>(
    stream: impl futures::Stream<Item = Result<Fetch, E>>,
    context: &str,
) -> Vec<Fetch> {
    futures::pin_mut!(stream);
    let mut items = Vec::new();
    while let Some(result) = stream.next().await {
        match result {
            Ok(fetch) => items.push(fetch),
            Err(e) => warn!("Skipping unparseable IMAP response ({}): {}", context, e),
        }
    }
    items
}

/// Highest `cap` UIDs, highest first. UIDs grow with arrival order.
fn newest_uids(found: impl IntoIterator<Item = u32>, cap: usize) -> Vec<u32> {
    let mut uids: Vec<u32> = found.into_iter().collect();
    uids.sort_unstable_by(|a, b| b.cmp(a));
    uids.truncate(cap);
    uids
}

fn sort_newest_first(messages: &mut [RawMessage]) {
    messages.sort_by(|a, b| {
        b.received_at
            .cmp(&a.received_at)
            .then_with(|| b.uid.cmp(&a.uid))
    });
}
