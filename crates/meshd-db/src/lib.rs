//! Storage engine for the meshd controller.
//!
//! Entities live in a single SQLite database. Every write goes through
//! [`Db::update`], which issues a monotonically increasing transaction id
//! and runs the registered [`EntityConstraint`]s for each entity change
//! before and after commit. The event dispatcher hooks in there to publish
//! entity change events and to keep its durable change log.

mod change;
mod context;
mod db;
mod entity;
mod error;
mod migrations;
mod pool;

pub use change::ChangeContext;
pub use context::MutateContext;
pub use db::Db;
pub use entity::{ChangeKind, EntityChangeState, EntityConstraint, EntityStore};
pub use error::DbError;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError, SyncMode};
