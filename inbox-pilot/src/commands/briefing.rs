use tracing::info;

use super::AppContext;
use crate::error::AgentError;
use crate::types::LatestBriefing;

/// The user's most recent briefing, or None before the first committed run.
pub async fn latest(ctx: &AppContext, user_id: &str) -> Result<Option<LatestBriefing>, AgentError> {
    info!("Command: latest - user {}", user_id);
    ctx.coordinator.latest(user_id).await
}
