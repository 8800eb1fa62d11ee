use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::trace::TraceEvent;
use email_classifier::Category;

/// Summary record of one completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Briefing {
    pub id: String,
    pub user_id: String,
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub trace: Vec<TraceEvent>,
}

/// One message's result inside a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEmail {
    pub id: String,
    pub user_id: String,
    pub batch_id: String,
    pub message_id: String,
    pub received_at: DateTime<Utc>,
    pub category: Category,
    pub draft_reply: Option<String>,
    pub excerpt: String,
    pub subject: String,
    pub from_address: String,
}

/// The current briefing for a user, with its emails newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestBriefing {
    pub briefing: Briefing,
    pub emails: Vec<ProcessedEmail>,
}
