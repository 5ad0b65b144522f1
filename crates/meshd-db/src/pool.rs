//! Connection settings and the SQLite connection pool behind [`crate::Db`].

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use thiserror::Error;

/// SQLite `synchronous` level applied to every connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Syncs the WAL on every commit. Committed change log entries survive
    /// power loss.
    #[default]
    Full,
    /// Syncs at checkpoints only. A commit may be lost on power loss, which
    /// loses its entity change events with it.
    Normal,
}

impl SyncMode {
    fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Normal => "NORMAL",
        }
    }
}

/// Connection tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a writer waits for the write lock before failing, in
    /// milliseconds. Write transactions are serialized, so this bounds how
    /// long a mutation may queue behind a flush.
    pub busy_timeout_ms: u64,

    pub pool_max_size: u32,

    /// How long a caller waits for a free pooled connection.
    pub connection_timeout_ms: u64,

    pub synchronous: SyncMode,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            connection_timeout_ms: 30_000,
            synchronous: SyncMode::Full,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

fn prepare_connection(conn: &mut Connection, settings: DbRuntimeSettings) -> rusqlite::Result<()> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    if journal_mode != "wal" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal mode {journal_mode} rejected, WAL required")),
        ));
    }
    conn.execute_batch(&format!(
        "PRAGMA foreign_keys = ON;
         PRAGMA synchronous = {};
         PRAGMA busy_timeout = {};",
        settings.synchronous.pragma_value(),
        settings.busy_timeout_ms
    ))
}

/// Opens a pool of connections to the store file at `db_path`.
///
/// The store must be a file: the write path and the post-commit readers
/// use separate connections and must see the same database.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| prepare_connection(conn, settings));

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .connection_timeout(Duration::from_millis(settings.connection_timeout_ms))
        .build(manager)?;

    tracing::debug!(
        path = db_path,
        max_size = settings.pool_max_size,
        synchronous = settings.synchronous.pragma_value(),
        "database pool ready"
    );
    Ok(pool)
}
