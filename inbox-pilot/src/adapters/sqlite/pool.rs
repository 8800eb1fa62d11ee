use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

use super::schema;
use crate::error::AgentError;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Open (creating if needed) the database file and initialize the schema.
pub fn create_pool(db_path: &Path) -> Result<DbPool, AgentError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // foreign_keys is per connection, so it goes in the init hook
    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;"));

    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;",
    )?;
    schema::initialize_schema(&conn)?;

    Ok(pool)
}

/// Single-connection in-memory database, used by tests and dry runs.
///
/// Every in-memory connection is its own database, so the pool is capped
/// at one connection that is never recycled.
pub fn create_memory_pool() -> Result<DbPool, AgentError> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));

    let pool = Pool::builder()
        .max_size(1)
        .min_idle(Some(1))
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)?;
    schema::initialize_schema(&*pool.get()?)?;

    Ok(pool)
}
