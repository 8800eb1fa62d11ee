use rusqlite::Connection;

use crate::error::AgentError;

pub fn initialize_schema(conn: &Connection) -> Result<(), AgentError> {
    conn.execute_batch("
        CREATE TABLE IF NOT EXISTS users (
            id                    TEXT PRIMARY KEY,   -- UUID
            email                 TEXT NOT NULL UNIQUE,
            name                  TEXT NOT NULL,
            encrypted_credential  TEXT,               -- base64(nonce || ciphertext), NULL until settings saved
            profile               TEXT NOT NULL DEFAULT '',
            created_at            INTEGER NOT NULL,   -- unix epoch ms
            updated_at            INTEGER NOT NULL
        );

        -- One row per committed run. Never updated after insert.
        CREATE TABLE IF NOT EXISTS briefings (
            id              TEXT PRIMARY KEY,   -- UUID
            user_id         TEXT NOT NULL REFERENCES users(id),
            batch_id        TEXT NOT NULL UNIQUE,
            created_at      INTEGER NOT NULL,   -- unix epoch ms
            trace           TEXT NOT NULL       -- JSON array of trace events
        );

        CREATE INDEX IF NOT EXISTS idx_briefings_user ON briefings(user_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS processed_emails (
            id              TEXT PRIMARY KEY,   -- UUID
            user_id         TEXT NOT NULL REFERENCES users(id),
            batch_id        TEXT NOT NULL REFERENCES briefings(batch_id),
            message_id      TEXT NOT NULL,      -- RFC 5322 Message-ID
            received_at     INTEGER NOT NULL,   -- unix epoch ms
            category        TEXT NOT NULL,      -- 'action-needed' | 'fyi' | 'newsletter' | 'errored'
            draft_reply     TEXT,
            excerpt         TEXT NOT NULL DEFAULT '',
            subject         TEXT NOT NULL DEFAULT '',
            from_address    TEXT NOT NULL DEFAULT '',

            UNIQUE(batch_id, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_processed_batch ON processed_emails(user_id, batch_id, received_at DESC);
    ")?;

    Ok(())
}
