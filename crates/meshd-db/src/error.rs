use thiserror::Error;

use crate::migrations::MigrationError;
use crate::pool::PoolError;

/// Errors raised by the storage engine and by entity constraints.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    PoolInit(#[from] PoolError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("entity state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no store registered for entity type '{0}'")]
    UnknownStore(String),

    #[error("{entity_type} '{id}' not found")]
    NotFound { entity_type: String, id: String },

    #[error("{entity_type} '{id}' already exists")]
    AlreadyExists { entity_type: String, id: String },

    /// A constraint vetoed the transaction.
    #[error("constraint violated: {0}")]
    Constraint(String),
}
