//! Local chat history storage
//!
//! The push-to-talk client keeps its transcript and client id in a small
//! `SQLite` file so a conversation survives restarts.

mod history;
mod schema;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::{Error, Result};

pub use history::MessageRepo;
pub use schema::SCHEMA_VERSION;

/// History database pool
pub type DbPool = Pool<SqliteConnectionManager>;

pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Open (or create) the history database at `path` and migrate it
///
/// # Errors
///
/// Returns error if the file cannot be opened or migrated
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
    });
    let pool = build_pool(manager, 2)?;

    tracing::debug!(path = %path.display(), version = SCHEMA_VERSION, "history database ready");
    Ok(pool)
}

/// In-memory history database
///
/// # Errors
///
/// Returns error if the schema cannot be created
pub fn init_memory() -> Result<DbPool> {
    // A single connection, since every in-memory connection is its own database
    build_pool(SqliteConnectionManager::memory(), 1)
}

fn build_pool(manager: SqliteConnectionManager, size: u32) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(size)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;
    drop(conn);

    Ok(pool)
}
