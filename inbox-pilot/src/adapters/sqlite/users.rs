//! Rows of the `users` table.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::DbPool;
use crate::error::AgentError;
use crate::types::User;

const USER_COLUMNS: &str =
    "id, email, name, encrypted_credential, profile, created_at, updated_at";

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        encrypted_credential: row.get(3)?,
        profile: row.get(4)?,
        created_at: millis_to_datetime(row.get(5)?),
        updated_at: millis_to_datetime(row.get(6)?),
    })
}

pub fn insert_user(pool: &DbPool, user: &User) -> Result<(), AgentError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO users (id, email, name, encrypted_credential, profile, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user.id,
            user.email,
            user.name,
            user.encrypted_credential,
            user.profile,
            user.created_at.timestamp_millis(),
            user.updated_at.timestamp_millis(),
        ],
    )?;
    debug!(user_id = %user.id, "Inserted user");
    Ok(())
}

pub fn get_user(pool: &DbPool, user_id: &str) -> Result<Option<User>, AgentError> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![user_id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

pub fn find_user_by_email(pool: &DbPool, email: &str) -> Result<Option<User>, AgentError> {
    let conn = pool.get()?;
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1 COLLATE NOCASE", USER_COLUMNS),
            params![email],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

/// Store a new encrypted credential, and the profile when given.
/// Returns false if the user does not exist.
pub fn update_settings(
    pool: &DbPool,
    user_id: &str,
    encrypted_credential: &str,
    profile: Option<&str>,
) -> Result<bool, AgentError> {
    let conn = pool.get()?;
    let now = Utc::now().timestamp_millis();
    let changed = match profile {
        Some(profile) => conn.execute(
            "UPDATE users SET encrypted_credential = ?2, profile = ?3, updated_at = ?4 WHERE id = ?1",
            params![user_id, encrypted_credential, profile, now],
        )?,
        None => conn.execute(
            "UPDATE users SET encrypted_credential = ?2, updated_at = ?3 WHERE id = ?1",
            params![user_id, encrypted_credential, now],
        )?,
    };
    Ok(changed > 0)
}
