//! The mutable view handed to write transactions.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::{OptionalExtension, Transaction};
use serde_json::Value;
use uuid::Uuid;

use crate::change::ChangeContext;
use crate::entity::{ChangeKind, EntityChangeState, EntityStore};
use crate::error::DbError;

/// An open write transaction.
///
/// Entity mutations made through the context are recorded as
/// [`EntityChangeState`]s and handed to the registered constraints once the
/// caller's closure returns. Raw SQL through [`MutateContext::tx`] is not
/// recorded.
pub struct MutateContext<'conn> {
    tx: Transaction<'conn>,
    tx_id: u64,
    change_ctx: OnceCell<ChangeContext>,
    stores: Arc<HashMap<String, EntityStore>>,
    changes: Vec<EntityChangeState>,
}

impl<'conn> MutateContext<'conn> {
    pub(crate) fn new(
        tx: Transaction<'conn>,
        tx_id: u64,
        change_ctx: Option<ChangeContext>,
        stores: Arc<HashMap<String, EntityStore>>,
    ) -> Self {
        let cell = OnceCell::new();
        if let Some(ctx) = change_ctx {
            let _ = cell.set(ctx);
        }
        Self {
            tx,
            tx_id,
            change_ctx: cell,
            stores,
            changes: Vec::new(),
        }
    }

    pub fn tx(&self) -> &Transaction<'conn> {
        &self.tx
    }

    /// Id of this write transaction. Strictly greater than the id of every
    /// write transaction committed before it.
    pub fn tx_id(&self) -> u64 {
        self.tx_id
    }

    /// The change context of this transaction, created empty on first use
    /// if the caller supplied none.
    pub fn change_context(&self) -> &ChangeContext {
        self.change_ctx.get_or_init(ChangeContext::new)
    }

    /// Changes recorded so far, in mutation order.
    pub fn changes(&self) -> &[EntityChangeState] {
        &self.changes
    }

    pub fn get(&self, entity_type: &str, id: &str) -> Result<Option<Value>, DbError> {
        self.store(entity_type)?;
        load(&self.tx, entity_type, id)
    }

    pub fn create(&mut self, entity_type: &str, id: &str, state: Value) -> Result<(), DbError> {
        let store = self.store(entity_type)?;
        if load(&self.tx, entity_type, id)?.is_some() {
            return Err(DbError::AlreadyExists {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            });
        }
        self.tx.execute(
            "INSERT INTO entities (entity_type, id, state_json) VALUES (?1, ?2, ?3)",
            (entity_type, id, serde_json::to_string(&state)?),
        )?;
        self.record(&store, id, ChangeKind::Created, None, Some(state));
        Ok(())
    }

    pub fn update(&mut self, entity_type: &str, id: &str, state: Value) -> Result<(), DbError> {
        let store = self.store(entity_type)?;
        let initial = self.require(entity_type, id)?;
        self.tx.execute(
            "UPDATE entities SET state_json = ?3, updated_at = datetime('now')
             WHERE entity_type = ?1 AND id = ?2",
            (entity_type, id, serde_json::to_string(&state)?),
        )?;
        self.record(&store, id, ChangeKind::Updated, Some(initial), Some(state));
        Ok(())
    }

    pub fn delete(&mut self, entity_type: &str, id: &str) -> Result<(), DbError> {
        let store = self.store(entity_type)?;
        let initial = self.require(entity_type, id)?;
        self.tx.execute(
            "DELETE FROM entities WHERE entity_type = ?1 AND id = ?2",
            (entity_type, id),
        )?;
        self.record(&store, id, ChangeKind::Deleted, Some(initial), None);
        Ok(())
    }

    pub(crate) fn take_changes(&mut self) -> Vec<EntityChangeState> {
        std::mem::take(&mut self.changes)
    }

    pub(crate) fn commit(self) -> Result<(), DbError> {
        self.tx.commit()?;
        Ok(())
    }

    fn store(&self, entity_type: &str) -> Result<EntityStore, DbError> {
        self.stores
            .get(entity_type)
            .cloned()
            .ok_or_else(|| DbError::UnknownStore(entity_type.to_string()))
    }

    fn require(&self, entity_type: &str, id: &str) -> Result<Value, DbError> {
        load(&self.tx, entity_type, id)?.ok_or_else(|| DbError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })
    }

    fn record(
        &mut self,
        store: &EntityStore,
        id: &str,
        kind: ChangeKind,
        initial_state: Option<Value>,
        final_state: Option<Value>,
    ) {
        let parent = store.parent.as_ref().map(|parent| EntityChangeState {
            event_id: Uuid::new_v4().to_string(),
            tx_id: self.tx_id,
            entity_type: parent.clone(),
            entity_id: id.to_string(),
            kind,
            initial_state: initial_state.clone(),
            final_state: final_state.clone(),
            is_parent_event: true,
        });

        self.changes.push(EntityChangeState {
            event_id: Uuid::new_v4().to_string(),
            tx_id: self.tx_id,
            entity_type: store.entity_type.clone(),
            entity_id: id.to_string(),
            kind,
            initial_state,
            final_state,
            is_parent_event: false,
        });
        self.changes.extend(parent);
    }
}

pub(crate) fn load(
    conn: &rusqlite::Connection,
    entity_type: &str,
    id: &str,
) -> Result<Option<Value>, DbError> {
    let json: Option<String> = conn
        .query_row(
            "SELECT state_json FROM entities WHERE entity_type = ?1 AND id = ?2",
            (entity_type, id),
            |row| row.get(0),
        )
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub(crate) fn count(conn: &rusqlite::Connection, entity_type: &str) -> Result<i64, DbError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE entity_type = ?1",
        [entity_type],
        |row| row.get(0),
    )?)
}

pub(crate) fn load_all(
    conn: &rusqlite::Connection,
    entity_type: &str,
) -> Result<Vec<(String, Value)>, DbError> {
    let mut stmt =
        conn.prepare("SELECT id, state_json FROM entities WHERE entity_type = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map([entity_type], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, json)| Ok((id, serde_json::from_str(&json)?)))
        .collect()
}
