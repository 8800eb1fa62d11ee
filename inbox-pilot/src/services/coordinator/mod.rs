//! Run orchestration.
//!
//! A run goes Locking -> FetchingMail -> Classifying -> Persisting and ends
//! Committed or Failed. Everything before the lock (user lookup, credential
//! decrypt) fails fast without touching the mailbox. Per-message failures
//! never fail the run; they become `errored` rows. Only a fetch failure or a
//! failed commit does, and neither leaves rows behind.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::classifier::{classify_with_retry, Classifier, RetryPolicy};
use super::mailbox::{MailboxClient, MailboxError};
use super::persistence::PersistenceGateway;
use super::run_lock::{RunGuard, RunLocks, RunState};
use super::trace::TraceRecorder;
use crate::config::RunPolicy;
use crate::encryption::CredentialVault;
use crate::error::AgentError;
use crate::types::{
    Briefing, Category, LatestBriefing, MailCredential, ProcessedEmail, RawMessage, TraceEvent,
    TraceStep, User,
};
use email_classifier::Decision;

#[cfg(test)]
mod tests;

pub const DEADLINE_REASON: &str = "run deadline exceeded";

/// Upper bound on a courtesy LOGOUT after a successful fetch.
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// What one classification task left behind. `None` means it never finished.
type TaskResult = Option<Result<Decision, String>>;

pub struct RunCoordinator {
    gateway: Arc<dyn PersistenceGateway>,
    mailbox: Arc<dyn MailboxClient>,
    classifier: Arc<dyn Classifier>,
    vault: Arc<CredentialVault>,
    locks: RunLocks,
    policy: RunPolicy,
}

impl RunCoordinator {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        mailbox: Arc<dyn MailboxClient>,
        classifier: Arc<dyn Classifier>,
        vault: Arc<CredentialVault>,
        policy: RunPolicy,
    ) -> Self {
        Self {
            gateway,
            mailbox,
            classifier,
            vault,
            locks: RunLocks::new(),
            policy,
        }
    }

    /// State of the user's in-flight run, `Idle` when there is none.
    pub fn status(&self, user_id: &str) -> RunState {
        self.locks.status(user_id)
    }

    pub async fn latest(&self, user_id: &str) -> Result<Option<LatestBriefing>, AgentError> {
        let user_id = user_id.to_string();
        self.with_gateway(move |gw| gw.read_latest(&user_id)).await
    }

    /// Process the user's inbox once and commit a briefing.
    ///
    /// Returns the id of the committed briefing.
    pub async fn start(&self, user_id: &str) -> Result<String, AgentError> {
        let user = {
            let id = user_id.to_string();
            self.with_gateway(move |gw| gw.load_user(&id)).await?
        }
        .ok_or_else(|| AgentError::UserNotFound(user_id.to_string()))?;

        let credential = self.open_credential(&user)?;

        let guard = self.locks.try_acquire(user_id)?;
        let deadline = Instant::now() + self.policy.run_timeout();
        let batch_id = Uuid::new_v4().to_string();

        info!(user_id = %user_id, batch_id = %batch_id, "Run started");

        match self.run(&guard, &user, credential, &batch_id, deadline).await {
            Ok(briefing_id) => {
                guard.transition(RunState::Committed);
                info!(user_id = %user_id, batch_id = %batch_id, briefing_id = %briefing_id, "Run committed");
                Ok(briefing_id)
            }
            Err(e) => {
                guard.transition(RunState::Failed);
                error!(user_id = %user_id, batch_id = %batch_id, code = e.code(), "Run failed: {}", e);
                Err(e)
            }
        }
    }

    fn open_credential(&self, user: &User) -> Result<MailCredential, AgentError> {
        let encrypted = user
            .encrypted_credential
            .as_deref()
            .ok_or_else(|| AgentError::Credential("No app password saved".into()))?;
        Ok(self.vault.open_credential(&user.email, encrypted)?)
    }

    async fn run(
        &self,
        guard: &RunGuard,
        user: &User,
        credential: MailCredential,
        batch_id: &str,
        deadline: Instant,
    ) -> Result<String, AgentError> {
        let trace = TraceRecorder::new();
        trace.record(TraceEvent::ok(TraceStep::Started));

        guard.transition(RunState::FetchingMail);
        let fetched = self.fetch(&credential, deadline).await?;
        drop(credential);

        let fetched_count = fetched.len();
        let messages = dedup_by_message_id(fetched);
        let mut fetched_event = TraceEvent::ok(TraceStep::Fetched { count: messages.len() });
        if messages.len() < fetched_count {
            fetched_event = fetched_event.with_detail(format!(
                "{} duplicate message(s) dropped",
                fetched_count - messages.len()
            ));
        }
        trace.record(fetched_event);

        guard.transition(RunState::Classifying);
        trace.begin_messages(messages.iter().map(|m| m.message_id.clone()));
        let (results, timed_out) = self
            .classify_all(&messages, &user.profile, &trace, deadline)
            .await;

        let unfinished = results.iter().filter(|r| r.is_none()).count();
        let emails = self.build_emails(user, batch_id, &messages, results, timed_out, &trace);

        if timed_out {
            warn!(user_id = %user.id, batch_id = %batch_id, "Run deadline exceeded");
            trace.record(TraceEvent::error(TraceStep::TimedOut).with_detail(format!(
                "deadline of {}s exceeded, {} message(s) errored",
                self.policy.run_timeout_secs, unfinished
            )));
        }

        guard.transition(RunState::Persisting);
        trace.record(TraceEvent::ok(TraceStep::Committed {
            batch_id: batch_id.to_string(),
        }));

        let briefing = Briefing {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            batch_id: batch_id.to_string(),
            created_at: Utc::now(),
            trace: trace.snapshot(),
        };
        let briefing_id = briefing.id.clone();

        self.with_gateway(move |gw| gw.commit_batch(&briefing, &emails))
            .await?;

        Ok(briefing_id)
    }

    async fn fetch(
        &self,
        credential: &MailCredential,
        deadline: Instant,
    ) -> Result<Vec<RawMessage>, AgentError> {
        let deadline_hit =
            || MailboxError::Connection(format!("{} while fetching mail", DEADLINE_REASON));

        let mut session = tokio::time::timeout_at(deadline, self.mailbox.connect(credential))
            .await
            .map_err(|_| deadline_hit())??;

        let fetched =
            tokio::time::timeout_at(deadline, session.fetch_recent(self.policy.fetch_cap)).await;

        // A server that stalled the fetch gets no LOGOUT; dropping the
        // session closes the socket.
        let Ok(fetched) = fetched else {
            return Err(deadline_hit().into());
        };

        match tokio::time::timeout(LOGOUT_TIMEOUT, session.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Mailbox logout failed: {}", e),
            Err(_) => warn!("Mailbox logout timed out after {:?}", LOGOUT_TIMEOUT),
        }

        let mut messages = fetched?;
        messages.truncate(self.policy.fetch_cap);
        Ok(messages)
    }

    /// Classify every message with bounded parallelism. Returns per-message
    /// results in fetch order and whether the deadline cut the work short.
    async fn classify_all(
        &self,
        messages: &[RawMessage],
        profile: &str,
        trace: &TraceRecorder,
        deadline: Instant,
    ) -> (Vec<TaskResult>, bool) {
        let semaphore = Arc::new(Semaphore::new(self.policy.concurrency.max(1)));
        let retry = Arc::new(RetryPolicy::from(&self.policy));
        let profile: Arc<str> = Arc::from(profile);

        let mut set = JoinSet::new();
        for (idx, message) in messages.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let retry = Arc::clone(&retry);
            let profile = Arc::clone(&profile);
            let classifier = Arc::clone(&self.classifier);
            let trace = trace.clone();

            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, Err("classification pool closed".to_string())),
                };

                let result =
                    classify_with_retry(classifier.as_ref(), &message, &profile, &retry, &trace)
                        .await;

                let result = match result {
                    Ok(decision) => {
                        trace.record(TraceEvent::ok(TraceStep::Classified {
                            message_id: message.message_id.clone(),
                            category: decision.category,
                        }));
                        Ok(decision)
                    }
                    Err(e) => {
                        trace.record(TraceEvent::error(TraceStep::Errored {
                            message_id: message.message_id.clone(),
                            reason: e.to_string(),
                        }));
                        Err(e.to_string())
                    }
                };
                (idx, result)
            });
        }

        let mut results: Vec<TaskResult> = (0..messages.len()).map(|_| None).collect();
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(joined)) => store_result(&mut results, joined),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    set.abort_all();
                    break;
                }
            }
        }

        // Tasks that finished around the deadline still hand back their
        // result; only the ones actually cancelled stay `None`.
        while let Some(joined) = set.join_next().await {
            store_result(&mut results, joined);
        }

        (results, timed_out)
    }

    /// One row per message, in fetch order. Messages whose task never
    /// finished are recorded here as errored.
    fn build_emails(
        &self,
        user: &User,
        batch_id: &str,
        messages: &[RawMessage],
        results: Vec<TaskResult>,
        timed_out: bool,
        trace: &TraceRecorder,
    ) -> Vec<ProcessedEmail> {
        messages
            .iter()
            .zip(results)
            .map(|(message, result)| {
                let (category, draft_reply) = match result {
                    Some(Ok(decision)) => (decision.category, decision.draft_reply),
                    Some(Err(_)) => (Category::Errored, None),
                    None => {
                        let reason = if timed_out {
                            DEADLINE_REASON
                        } else {
                            "classification task aborted"
                        };
                        trace.record(TraceEvent::error(TraceStep::Errored {
                            message_id: message.message_id.clone(),
                            reason: reason.to_string(),
                        }));
                        (Category::Errored, None)
                    }
                };

                ProcessedEmail {
                    id: Uuid::new_v4().to_string(),
                    user_id: user.id.clone(),
                    batch_id: batch_id.to_string(),
                    message_id: message.message_id.clone(),
                    received_at: message.received_at,
                    category,
                    draft_reply,
                    excerpt: message.excerpt(self.policy.excerpt_chars),
                    subject: message.envelope.subject.clone(),
                    from_address: message.envelope.from_address.clone(),
                }
            })
            .collect()
    }

    async fn with_gateway<T, F>(&self, f: F) -> Result<T, AgentError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn PersistenceGateway) -> Result<T, AgentError> + Send + 'static,
    {
        let gateway = Arc::clone(&self.gateway);
        tokio::task::spawn_blocking(move || f(gateway.as_ref()))
            .await
            .map_err(|e| AgentError::Persistence(format!("Storage task failed: {}", e)))?
    }
}

fn store_result(
    results: &mut [TaskResult],
    joined: Result<(usize, Result<Decision, String>), tokio::task::JoinError>,
) {
    match joined {
        Ok((idx, result)) => results[idx] = Some(result),
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!("Classification task ended abnormally: {}", e),
    }
}

/// Keep the first (newest) message for every message id.
fn dedup_by_message_id(messages: Vec<RawMessage>) -> Vec<RawMessage> {
    let mut seen = HashSet::new();
    messages
        .into_iter()
        .filter(|m| seen.insert(m.message_id.clone()))
        .collect()
}
