//! Per-circuit data usage events.
//!
//! Routers report usage inside metrics snapshots. Version 2 events carry
//! one counter of one circuit for one interval; version 3 events carry
//! every counter of a circuit for an interval at once.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const USAGE_EVENT_NS: &str = "usage";
pub const USAGE_EVENT_LEGACY_NS: &str = "fabric.usage";

/// Prefix of the interval counters that carry usage.
pub const USAGE_COUNTER_PREFIX: &str = "usage.";

/// Every usage type a router reports.
pub const USAGE_TYPES: &[&str] = &[
    "ingress.rx",
    "ingress.tx",
    "egress.rx",
    "egress.tx",
    "fabric.rx",
    "fabric.tx",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub namespace: String,
    pub version: u32,
    /// The counter name, such as `usage.ingress.tx`.
    pub event_type: String,
    pub source_id: String,
    pub circuit_id: String,
    pub usage: u64,
    pub interval_start_utc: i64,
    pub interval_length: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl fmt::Display for UsageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} source={} circuitId={} usage={}",
            self.namespace, self.event_type, self.source_id, self.circuit_id, self.usage
        )
    }
}

impl Event for UsageEvent {
    const NAMESPACE: &'static str = USAGE_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(USAGE_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "UsageEventHandler";
    const EVENT_TYPES: &'static [&'static str] = USAGE_TYPES;

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn event_type_name(&self) -> &str {
        self.event_type
            .strip_prefix(USAGE_COUNTER_PREFIX)
            .unwrap_or(&self.event_type)
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.usage_handler()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEventV3 {
    pub namespace: String,
    pub version: u32,
    pub source_id: String,
    pub circuit_id: String,
    /// Byte counts keyed by usage type.
    pub usage: BTreeMap<String, u64>,
    pub interval_start_utc: i64,
    pub interval_length: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl fmt::Display for UsageEventV3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} source={} circuitId={} types={}",
            self.namespace,
            self.source_id,
            self.circuit_id,
            self.usage.len()
        )
    }
}

impl Event for UsageEventV3 {
    const NAMESPACE: &'static str = USAGE_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(USAGE_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "UsageEventV3Handler";

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.usage_v3_handler()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_type_drops_counter_prefix() {
        let event = UsageEvent {
            namespace: USAGE_EVENT_NS.to_string(),
            version: 2,
            event_type: "usage.egress.rx".to_string(),
            source_id: "r1".to_string(),
            circuit_id: "c1".to_string(),
            usage: 10,
            interval_start_utc: 60,
            interval_length: 60,
            tags: BTreeMap::new(),
        };
        assert_eq!(event.event_type_name(), "egress.rx");
        assert!(USAGE_TYPES.contains(&event.event_type_name()));
    }
}
