//! Briefing batches: atomic commit and latest read.
//!
//! A batch is one `briefings` row plus its `processed_emails` rows, written
//! in a single transaction. Readers either see the whole batch or none of
//! it; a failed insert anywhere rolls the transaction back when it drops.

use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use super::users::millis_to_datetime;
use super::DbPool;
use crate::error::AgentError;
use crate::types::{Briefing, Category, LatestBriefing, ProcessedEmail};

pub fn commit_batch(
    pool: &DbPool,
    briefing: &Briefing,
    emails: &[ProcessedEmail],
) -> Result<(), AgentError> {
    if let Some(stray) = emails
        .iter()
        .find(|e| e.batch_id != briefing.batch_id || e.user_id != briefing.user_id)
    {
        return Err(AgentError::Persistence(format!(
            "email {} does not belong to batch {}",
            stray.message_id, briefing.batch_id
        )));
    }

    let trace_json = serde_json::to_string(&briefing.trace)
        .map_err(|e| AgentError::Persistence(format!("Failed to encode trace: {}", e)))?;

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO briefings (id, user_id, batch_id, created_at, trace)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            briefing.id,
            briefing.user_id,
            briefing.batch_id,
            briefing.created_at.timestamp_millis(),
            trace_json,
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO processed_emails
                (id, user_id, batch_id, message_id, received_at, category, draft_reply, excerpt, subject, from_address)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for email in emails {
            stmt.execute(params![
                email.id,
                email.user_id,
                email.batch_id,
                email.message_id,
                email.received_at.timestamp_millis(),
                email.category.as_str(),
                email.draft_reply,
                email.excerpt,
                email.subject,
                email.from_address,
            ])?;
        }
    }

    tx.commit()?;

    info!(
        user_id = %briefing.user_id,
        batch_id = %briefing.batch_id,
        emails = emails.len(),
        "Committed briefing batch"
    );
    Ok(())
}

pub fn read_latest(pool: &DbPool, user_id: &str) -> Result<Option<LatestBriefing>, AgentError> {
    let conn = pool.get()?;

    let row = conn
        .query_row(
            "SELECT id, user_id, batch_id, created_at, trace FROM briefings
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let (id, user_id, batch_id, created_at, trace_json) = match row {
        Some(r) => r,
        None => return Ok(None),
    };

    let trace = serde_json::from_str(&trace_json)
        .map_err(|e| AgentError::Persistence(format!("Stored trace is not valid JSON: {}", e)))?;

    let mut stmt = conn.prepare(
        "SELECT id, user_id, batch_id, message_id, received_at, category, draft_reply, excerpt, subject, from_address
         FROM processed_emails
         WHERE user_id = ?1 AND batch_id = ?2
         ORDER BY received_at DESC",
    )?;

    let emails = stmt
        .query_map(params![user_id, batch_id], |row| {
            let category: String = row.get(5)?;
            Ok(ProcessedEmail {
                id: row.get(0)?,
                user_id: row.get(1)?,
                batch_id: row.get(2)?,
                message_id: row.get(3)?,
                received_at: millis_to_datetime(row.get(4)?),
                category: Category::parse(&category).unwrap_or(Category::Errored),
                draft_reply: row.get(6)?,
                excerpt: row.get(7)?,
                subject: row.get(8)?,
                from_address: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    debug!(user_id = %user_id, batch_id = %batch_id, emails = emails.len(), "Read latest briefing");

    Ok(Some(LatestBriefing {
        briefing: Briefing {
            id,
            user_id,
            batch_id,
            created_at: millis_to_datetime(created_at),
            trace,
        },
        emails,
    }))
}

/// Number of briefings and processed emails stored for a batch.
pub fn count_batch_rows(pool: &DbPool, batch_id: &str) -> Result<(i64, i64), AgentError> {
    let conn = pool.get()?;
    let briefings: i64 = conn.query_row(
        "SELECT COUNT(*) FROM briefings WHERE batch_id = ?1",
        params![batch_id],
        |row| row.get(0),
    )?;
    let emails: i64 = conn.query_row(
        "SELECT COUNT(*) FROM processed_emails WHERE batch_id = ?1",
        params![batch_id],
        |row| row.get(0),
    )?;
    Ok((briefings, emails))
}
