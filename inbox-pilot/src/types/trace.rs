use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use email_classifier::Category;

/// What happened at one step of a run.
///
/// Serialized as a tagged object (`{"kind": "fetched", "count": 3}`) so the
/// dashboard can render each step without parsing text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceStep {
    Started,
    Fetched { count: usize },
    Classified { message_id: String, category: Category },
    Retried { message_id: String, attempt: u32 },
    Errored { message_id: String, reason: String },
    TimedOut,
    Committed { batch_id: String },
}

impl TraceStep {
    /// The message this step belongs to, if it is message-scoped.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Classified { message_id, .. }
            | Self::Retried { message_id, .. }
            | Self::Errored { message_id, .. } => Some(message_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Error,
    Retry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    pub step: TraceStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub outcome: Outcome,
}

impl TraceEvent {
    pub fn new(step: TraceStep, outcome: Outcome) -> Self {
        Self {
            timestamp: Utc::now(),
            step,
            detail: None,
            outcome,
        }
    }

    pub fn ok(step: TraceStep) -> Self {
        Self::new(step, Outcome::Ok)
    }

    pub fn error(step: TraceStep) -> Self {
        Self::new(step, Outcome::Error)
    }

    pub fn retry(step: TraceStep) -> Self {
        Self::new(step, Outcome::Retry)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
