//! Entity stores, recorded changes, and the constraint hook.

use std::fmt;

use serde_json::Value;

use crate::context::MutateContext;
use crate::error::DbError;

/// A registered entity type.
///
/// A store with a parent shares identity with an entity of the parent type:
/// every change made through it is also reported against the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityStore {
    pub entity_type: String,
    pub parent: Option<String>,
}

impl EntityStore {
    pub fn new(entity_type: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            parent: None,
        }
    }

    pub fn with_parent(entity_type: &str, parent: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            parent: Some(parent.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entity mutation recorded inside a write transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChangeState {
    /// Fresh per change; shared by the change event and its commit marker.
    pub event_id: String,
    pub tx_id: u64,
    pub entity_type: String,
    pub entity_id: String,
    pub kind: ChangeKind,
    pub initial_state: Option<Value>,
    pub final_state: Option<Value>,
    pub is_parent_event: bool,
}

/// Hook invoked for every change to the entity types it is registered on.
pub trait EntityConstraint: Send + Sync {
    /// Runs inside the write transaction, before commit. An error rolls the
    /// whole transaction back.
    fn process_pre_commit(
        &self,
        ctx: &MutateContext<'_>,
        state: &EntityChangeState,
    ) -> Result<(), DbError>;

    /// Runs after the transaction committed. Cannot fail the write.
    fn process_post_commit(&self, state: &EntityChangeState);
}
