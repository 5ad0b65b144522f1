//! Entity mutation events.
//!
//! An entity change is reported twice on the normal path: once with the
//! before/after state while the producing transaction is still open
//! (`created`, `updated`, `deleted`), and once as `committed` after the
//! transaction became durable. If the process dies between commit and the
//! second notification, a later transaction synthesizes the `committed`
//! event from the durable change log and flags it as a recovery event.
//! Consumers deduplicate on `event_id`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const ENTITY_CHANGE_EVENT_NS: &str = "entityChange";
pub const ENTITY_CHANGE_EVENTS_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityChangeType {
    Created,
    Updated,
    Deleted,
    Committed,
}

impl EntityChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Committed => "committed",
        }
    }
}

impl fmt::Display for EntityChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A create/update/delete of a stored entity, or the commit marker for one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChangeEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: u32,

    /// Shared by the change event and its commit marker.
    pub event_id: String,
    pub event_type: EntityChangeType,

    /// Change context (author, trace id, source) merged with the
    /// dispatcher's global metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    /// Empty on committed events that passed through a subscription filter.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entity_type: String,

    /// Set when the change is a side effect of a change to a child entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_parent_event: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_state: Option<Value>,

    /// True if this node was leader (or the cluster leaderless) at emission.
    #[serde(skip)]
    pub propagate_indicator: bool,

    /// Synthesized from the change log after a lost commit notification.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_recovery_event: bool,
}

impl EntityChangeEvent {
    /// Builds the minimal commit marker emitted by the recovery scanner.
    ///
    /// Only the event id and entity type survive a crash; the before/after
    /// state was never persisted.
    pub fn recovery(event_src_id: &str, event_id: &str, entity_type: &str) -> Self {
        Self {
            namespace: ENTITY_CHANGE_EVENT_NS.to_string(),
            event_src_id: event_src_id.to_string(),
            timestamp: Utc::now(),
            version: ENTITY_CHANGE_EVENTS_VERSION,
            event_id: event_id.to_string(),
            event_type: EntityChangeType::Committed,
            metadata: BTreeMap::new(),
            entity_type: entity_type.to_string(),
            is_parent_event: None,
            initial_state: None,
            final_state: None,
            propagate_indicator: false,
            is_recovery_event: true,
        }
    }

    pub fn is_parent(&self) -> bool {
        self.is_parent_event.unwrap_or(false)
    }
}

impl fmt::Display for EntityChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} eventId={} entityType={}",
            self.namespace, self.event_type, self.event_id, self.entity_type
        )?;
        if self.is_recovery_event {
            f.write_str(" recovery=true")?;
        }
        Ok(())
    }
}

impl Event for EntityChangeEvent {
    const NAMESPACE: &'static str = ENTITY_CHANGE_EVENT_NS;
    const CAPABILITY: &'static str = "EntityChangeEventHandler";

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn event_type_name(&self) -> &str {
        self.event_type.as_str()
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.entity_change_handler()
    }
}
