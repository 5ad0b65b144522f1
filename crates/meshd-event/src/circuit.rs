//! Circuit lifecycle events.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const CIRCUIT_EVENT_NS: &str = "circuit";
pub const CIRCUIT_EVENT_LEGACY_NS: &str = "fabric.circuits";
pub const CIRCUIT_EVENTS_VERSION: u32 = 2;

/// Stage of the circuit lifecycle an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitEventType {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "pathUpdated")]
    PathUpdated,
    #[serde(rename = "deleted")]
    Deleted,
    #[serde(rename = "failed")]
    Failed,
}

impl CircuitEventType {
    pub const ALL: &'static [&'static str] = &["created", "pathUpdated", "deleted", "failed"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::PathUpdated => "pathUpdated",
            Self::Deleted => "deleted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CircuitEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routers and links a circuit traverses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitPath {
    /// Routers from the initiating router to the terminating router.
    pub nodes: Vec<String>,
    /// Links between consecutive nodes. Empty when both ends share a router.
    pub links: Vec<String>,
    pub ingress_id: String,
    pub egress_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub initiator_local_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub initiator_remote_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminator_local_addr: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminator_remote_addr: String,
}

impl fmt::Display for CircuitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(first) = self.nodes.first() else {
            return f.write_str("{}");
        };
        if self.links.len() + 1 != self.nodes.len() {
            return f.write_str("{malformed}");
        }
        write!(f, "[r/{first}]")?;
        for (link, node) in self.links.iter().zip(self.nodes.iter().skip(1)) {
            write!(f, "->[l/{link}]->[r/{node}]")?;
        }
        Ok(())
    }
}

/// Emitted at each stage of a circuit's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub event_type: CircuitEventType,
    pub circuit_id: String,
    /// Who the circuit was created for, usually an edge session id.
    pub client_id: String,
    pub service_id: String,
    pub terminator_id: String,
    pub instance_id: String,
    /// Time taken to establish the circuit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timespan: Option<Duration>,
    pub path: CircuitPath,
    pub link_count: usize,
    #[serde(rename = "path_cost", default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<u32>,
    /// Only present on failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<String>,
    /// How long the circuit has been up. Absent on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl fmt::Display for CircuitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} circuitId={} clientId={} serviceId={} path={}",
            self.namespace, self.event_type, self.circuit_id, self.client_id, self.service_id, self.path
        )?;
        if !self.path.terminator_local_addr.is_empty() {
            write!(f, " ({})", self.path.terminator_local_addr)?;
        }
        if let Some(timespan) = self.creation_timespan {
            write!(f, " creationTimespan={timespan:?}")?;
        }
        Ok(())
    }
}

impl Event for CircuitEvent {
    const NAMESPACE: &'static str = CIRCUIT_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(CIRCUIT_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "CircuitEventHandler";
    const EVENT_TYPES: &'static [&'static str] = CircuitEventType::ALL;

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
        subscriber.circuit_handler()
    }
}
