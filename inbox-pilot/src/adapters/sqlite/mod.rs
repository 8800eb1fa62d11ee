pub mod briefings;
pub mod pool;
pub mod schema;
pub mod users;

pub use pool::DbPool;

use crate::error::AgentError;
use crate::services::persistence::PersistenceGateway;
use crate::types::{Briefing, LatestBriefing, ProcessedEmail, User};

/// [`PersistenceGateway`] over the pooled SQLite store.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: DbPool,
}

impl SqliteGateway {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl PersistenceGateway for SqliteGateway {
    fn load_user(&self, user_id: &str) -> Result<Option<User>, AgentError> {
        users::get_user(&self.pool, user_id)
    }

    fn commit_batch(&self, briefing: &Briefing, emails: &[ProcessedEmail]) -> Result<(), AgentError> {
        briefings::commit_batch(&self.pool, briefing, emails)
    }

    fn read_latest(&self, user_id: &str) -> Result<Option<LatestBriefing>, AgentError> {
        briefings::read_latest(&self.pool, user_id)
    }
}
