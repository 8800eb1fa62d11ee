use tracing::info;

use super::AppContext;
use crate::error::AgentError;
use crate::types::{User, UserSettings};

pub fn signup(ctx: &AppContext, email: &str, name: Option<&str>) -> Result<User, AgentError> {
    info!("Command: signup");
    ctx.directory.signup(email, name)
}

/// Save the app password (and profile, if given), returning the new settings.
pub fn save_settings(
    ctx: &AppContext,
    user_id: &str,
    app_password: &str,
    profile: Option<&str>,
) -> Result<UserSettings, AgentError> {
    info!("Command: save_settings - user {}", user_id);
    ctx.directory.save_settings(user_id, app_password, profile)?;
    ctx.directory.get_settings(user_id)
}

pub fn get_settings(ctx: &AppContext, user_id: &str) -> Result<UserSettings, AgentError> {
    info!("Command: get_settings - user {}", user_id);
    ctx.directory.get_settings(user_id)
}
