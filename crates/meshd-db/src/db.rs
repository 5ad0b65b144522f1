//! Transactions over the pooled store.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;

use crate::change::ChangeContext;
use crate::context::{self, MutateContext};
use crate::entity::{EntityConstraint, EntityStore};
use crate::error::DbError;
use crate::migrations::run_migrations;
use crate::pool::{create_pool, DbPool, DbRuntimeSettings};

type ConstraintMap = HashMap<String, Vec<Arc<dyn EntityConstraint>>>;

/// The entity store.
///
/// Write transactions are serialized by SQLite: `update` takes the write
/// lock up front, so at most one write transaction is open at any time and
/// transaction ids are issued in commit order.
pub struct Db {
    pool: DbPool,
    stores: ArcSwap<HashMap<String, EntityStore>>,
    constraints: ArcSwap<ConstraintMap>,
}

impl Db {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            stores: ArcSwap::from_pointee(HashMap::new()),
            constraints: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Opens the store at `path` and brings its schema up to date.
    pub fn open(path: &str, settings: DbRuntimeSettings) -> Result<Self, DbError> {
        let pool = create_pool(path, settings)?;
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            tracing::debug!(applied, "schema up to date");
        }
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn add_store(&self, store: EntityStore) {
        self.stores.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(store.entity_type.clone(), store.clone());
            next
        });
    }

    /// Registered entity types, sorted.
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.stores.load().keys().cloned().collect();
        types.sort();
        types
    }

    /// Attaches `constraint` to the store of `entity_type`.
    pub fn add_constraint(
        &self,
        entity_type: &str,
        constraint: Arc<dyn EntityConstraint>,
    ) -> Result<(), DbError> {
        if !self.stores.load().contains_key(entity_type) {
            return Err(DbError::UnknownStore(entity_type.to_string()));
        }
        self.constraints.rcu(|current| {
            let mut next = ConstraintMap::clone(current);
            next.entry(entity_type.to_string())
                .or_default()
                .push(constraint.clone());
            next
        });
        Ok(())
    }

    /// Runs `f` in a new write transaction.
    ///
    /// After `f` returns, every constraint registered on a changed entity
    /// type sees each change in pre-commit; any error there, or from `f`,
    /// rolls everything back. Post-commit hooks run once the commit is
    /// durable.
    pub fn update<T, F>(&self, change_ctx: Option<ChangeContext>, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut MutateContext<'_>) -> Result<T, DbError>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tx_id = next_tx_id(&tx)?;
        let mut ctx = MutateContext::new(tx, tx_id, change_ctx, self.stores.load_full());

        let out = f(&mut ctx)?;

        let changes = ctx.take_changes();
        let constraints = self.constraints.load_full();
        for state in &changes {
            for constraint in constraints.get(&state.entity_type).into_iter().flatten() {
                constraint.process_pre_commit(&ctx, state)?;
            }
        }

        ctx.commit()?;
        tracing::trace!(tx_id, changes = changes.len(), "write transaction committed");

        // Post-commit hooks may read through the pool.
        drop(conn);

        for state in &changes {
            for constraint in constraints.get(&state.entity_type).into_iter().flatten() {
                constraint.process_post_commit(state);
            }
        }
        Ok(out)
    }

    /// Runs `f` against a pooled connection, outside any write transaction.
    pub fn view<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn = self.pool.get()?;
        f(&conn)
    }

    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Value>, DbError> {
        self.view(|conn| context::load(conn, entity_type, id))
    }

    pub fn count(&self, entity_type: &str) -> Result<i64, DbError> {
        self.view(|conn| context::count(conn, entity_type))
    }

    /// Every stored entity of `entity_type` as `(id, state)`, ordered by id.
    pub fn list(&self, entity_type: &str) -> Result<Vec<(String, Value)>, DbError> {
        self.view(|conn| context::load_all(conn, entity_type))
    }
}

fn next_tx_id(conn: &Connection) -> Result<u64, DbError> {
    let id: i64 = conn.query_row(
        "UPDATE tx_sequence SET last_tx_id = last_tx_id + 1 WHERE id = 1 RETURNING last_tx_id",
        [],
        |row| row.get(0),
    )?;
    Ok(id as u64)
}
