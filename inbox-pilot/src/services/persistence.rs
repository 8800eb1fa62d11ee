use crate::error::AgentError;
use crate::types::{Briefing, LatestBriefing, ProcessedEmail, User};

/// Store contract used by the run coordinator.
///
/// Calls are blocking; async callers go through `spawn_blocking`.
pub trait PersistenceGateway: Send + Sync + 'static {
    fn load_user(&self, user_id: &str) -> Result<Option<User>, AgentError>;

    /// Write a briefing and all of its emails, or nothing at all.
    fn commit_batch(&self, briefing: &Briefing, emails: &[ProcessedEmail]) -> Result<(), AgentError>;

    fn read_latest(&self, user_id: &str) -> Result<Option<LatestBriefing>, AgentError>;
}
