use serde::Serialize;
use tracing::info;

use super::AppContext;
use crate::error::AgentError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub briefing_id: String,
}

/// Process the user's inbox once.
pub async fn run(ctx: &AppContext, user_id: &str) -> Result<RunResponse, AgentError> {
    info!("Command: run - user {}", user_id);
    let briefing_id = ctx.coordinator.start(user_id).await?;
    Ok(RunResponse { briefing_id })
}
