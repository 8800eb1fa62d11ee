//! Classification seam plus bounded retry.
//!
//! Every call is wrapped in a per-call timeout. Failures of any kind are
//! retried with exponential backoff until the attempt budget is spent; the
//! last error is handed back so the caller can mark the message errored.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::trace::TraceRecorder;
use crate::config::RunPolicy;
use crate::types::{RawMessage, TraceEvent, TraceStep};
use email_classifier::Decision;

#[derive(Debug, Clone, Error)]
pub enum ClassifyError {
    #[error("classification timed out after {0:?}")]
    Timeout(Duration),

    #[error("generative backend failed: {0}")]
    Backend(String),

    #[error("unusable answer: {0}")]
    Parse(String),
}

impl From<inbox_llm::Error> for ClassifyError {
    fn from(e: inbox_llm::Error) -> Self {
        ClassifyError::Backend(e.to_string())
    }
}

impl From<email_classifier::ParseError> for ClassifyError {
    fn from(e: email_classifier::ParseError) -> Self {
        ClassifyError::Parse(e.to_string())
    }
}

/// Decides a category (and maybe a draft reply) for one message.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &RawMessage, profile: &str) -> Result<Decision, ClassifyError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub call_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random 0..jitter_fraction of the delay is added.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RunPolicy::default())
    }
}

impl From<&RunPolicy> for RetryPolicy {
    fn from(policy: &RunPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts.max(1),
            call_timeout: policy.call_timeout(),
            base_delay: Duration::from_millis(policy.retry_base_delay_ms),
            max_delay: Duration::from_millis(policy.retry_max_delay_ms),
            jitter_fraction: 0.25,
        }
    }
}

/// Delay before retry number `attempt` (0-indexed):
/// `min(base * 2^attempt, max)` plus jitter.
pub fn compute_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let base_ms = policy.base_delay.as_millis() as u64;
    let capped_ms = base_ms
        .saturating_mul(exp)
        .min(policy.max_delay.as_millis() as u64);

    let jitter_max_ms = (capped_ms as f64 * policy.jitter_fraction) as u64;
    let jitter_ms = if jitter_max_ms > 0 {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        seed % (jitter_max_ms + 1)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter_ms)
}

/// Classify with timeout and bounded retry, recording a `Retried` event
/// before every attempt after the first.
pub async fn classify_with_retry(
    classifier: &dyn Classifier,
    message: &RawMessage,
    profile: &str,
    policy: &RetryPolicy,
    trace: &TraceRecorder,
) -> Result<Decision, ClassifyError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(
            policy.call_timeout,
            classifier.classify(message, profile),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ClassifyError::Timeout(policy.call_timeout)),
        };

        let err = match result {
            Ok(decision) => {
                if attempt > 1 {
                    debug!(message_id = %message.message_id, attempt, "classification succeeded after retry");
                }
                return Ok(decision);
            }
            Err(err) => err,
        };

        if attempt >= max_attempts {
            warn!(
                message_id = %message.message_id,
                attempts = attempt,
                error = %err,
                "classification attempts exhausted"
            );
            return Err(err);
        }

        let delay = compute_delay(policy, attempt - 1);
        warn!(
            message_id = %message.message_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying classification"
        );

        attempt += 1;
        trace.record(
            TraceEvent::retry(TraceStep::Retried {
                message_id: message.message_id.clone(),
                attempt,
            })
            .with_detail(err.to_string()),
        );

        tokio::time::sleep(delay).await;
    }
}
