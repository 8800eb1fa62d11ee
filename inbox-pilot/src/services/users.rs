//! Signup and settings.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::adapters::sqlite::{users, DbPool};
use crate::encryption::CredentialVault;
use crate::error::AgentError;
use crate::types::{User, UserSettings};

#[derive(Clone)]
pub struct UserDirectory {
    pool: DbPool,
    vault: Arc<CredentialVault>,
}

impl UserDirectory {
    pub fn new(pool: DbPool, vault: Arc<CredentialVault>) -> Self {
        Self { pool, vault }
    }

    /// Create a user. The display name defaults to the address's local part.
    pub fn signup(&self, email: &str, name: Option<&str>) -> Result<User, AgentError> {
        let email = normalize_email(email)?;

        if users::find_user_by_email(&self.pool, &email)?.is_some() {
            return Err(AgentError::Conflict(format!("{} is already registered", email)));
        }

        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => local_part(&email).to_string(),
        };

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            name,
            encrypted_credential: None,
            profile: String::new(),
            created_at: now,
            updated_at: now,
        };
        users::insert_user(&self.pool, &user)?;

        info!(user_id = %user.id, "User signed up");
        Ok(user)
    }

    /// Store a new app password, and the profile when one is given.
    pub fn save_settings(
        &self,
        user_id: &str,
        app_password: &str,
        profile: Option<&str>,
    ) -> Result<(), AgentError> {
        if app_password.trim().is_empty() {
            return Err(AgentError::InvalidInput("App password is required".into()));
        }

        let encrypted = self.vault.encrypt(app_password)?;
        let updated = users::update_settings(&self.pool, user_id, &encrypted, profile)?;
        if !updated {
            return Err(AgentError::UserNotFound(user_id.to_string()));
        }

        info!(
            user_id = %user_id,
            profile_updated = profile.is_some(),
            "Settings saved"
        );
        Ok(())
    }

    pub fn get_settings(&self, user_id: &str) -> Result<UserSettings, AgentError> {
        let user = users::get_user(&self.pool, user_id)?
            .ok_or_else(|| AgentError::UserNotFound(user_id.to_string()))?;

        Ok(UserSettings {
            has_app_password: user.encrypted_credential.is_some(),
            user_profile: user.profile,
        })
    }
}

fn normalize_email(email: &str) -> Result<String, AgentError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AgentError::InvalidInput(format!("Not an email address: {:?}", email)));
    }
    Ok(email)
}

fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
