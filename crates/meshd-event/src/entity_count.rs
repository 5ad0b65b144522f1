//! Periodic entity count reports.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const ENTITY_COUNT_EVENT_NS: &str = "entityCount";
pub const ENTITY_COUNT_EVENT_LEGACY_NS: &str = "edge.entityCounts";

/// How many entities each store held when the report was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCountEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    /// Keyed by entity type.
    pub counts: BTreeMap<String, i64>,
    /// Set when the counts could not be read; `counts` is then partial.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl fmt::Display for EntityCountEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} types={}", self.namespace, self.counts.len())?;
        if !self.error.is_empty() {
            write!(f, " error={}", self.error)?;
        }
        Ok(())
    }
}

impl Event for EntityCountEvent {
    const NAMESPACE: &'static str = ENTITY_COUNT_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(ENTITY_COUNT_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "EntityCountEventHandler";

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.entity_count_handler()
    }
}
