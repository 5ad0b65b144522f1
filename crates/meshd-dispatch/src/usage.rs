//! Usage events: registration and their derivation from metrics snapshots.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use meshd_event::{
    matches_handler, Event, EventHandler, HandlerRef, MetricsMessage, MetricsMessageHandler,
    Subscriber, UsageEvent, UsageEventV3, USAGE_COUNTER_PREFIX, USAGE_EVENT_NS, USAGE_TYPES,
};
use serde_json::Value;

use crate::dispatcher::{Dispatcher, TypeRegistrar};
use crate::error::DispatchError;
use crate::kinds::require_handler;
use crate::options::{include_filter, Options};
use crate::wrapper::{for_namespace, with_include};

/// Event format version used when a subscription names none.
pub const DEFAULT_USAGE_VERSION: u32 = 2;

/// One version 2 event per circuit, usage counter and interval.
pub fn usage_events(msg: &MetricsMessage) -> Vec<UsageEvent> {
    let mut events = Vec::new();
    for (name, counter) in &msg.interval_counters {
        if !name.starts_with(USAGE_COUNTER_PREFIX) {
            continue;
        }
        for bucket in &counter.buckets {
            for (circuit_id, usage) in &bucket.values {
                events.push(UsageEvent {
                    namespace: USAGE_EVENT_NS.to_string(),
                    version: 2,
                    event_type: name.clone(),
                    source_id: msg.source_id.clone(),
                    circuit_id: circuit_id.clone(),
                    usage: *usage,
                    interval_start_utc: bucket.interval_start_utc,
                    interval_length: counter.interval_length,
                    tags: msg.tags.clone(),
                });
            }
        }
    }
    events
}

/// One version 3 event per circuit and interval.
pub fn usage_events_v3(msg: &MetricsMessage) -> Vec<UsageEventV3> {
    let mut events = Vec::new();
    for counter in &msg.usage_counters {
        for (circuit_id, bucket) in &counter.buckets {
            events.push(UsageEventV3 {
                namespace: USAGE_EVENT_NS.to_string(),
                version: 3,
                source_id: msg.source_id.clone(),
                circuit_id: circuit_id.clone(),
                usage: bucket.values.clone(),
                interval_start_utc: counter.interval_start_utc,
                interval_length: counter.interval_length,
                tags: bucket.tags.clone(),
            });
        }
    }
    events
}

/// Keeps only the included usage types of each version 3 event. Events
/// left with no usage are dropped.
pub struct UsageV3Filter {
    include: HashSet<String>,
    wrapped: HandlerRef<UsageEventV3>,
}

impl UsageV3Filter {
    pub fn new(include: HashSet<String>, wrapped: HandlerRef<UsageEventV3>) -> Self {
        Self { include, wrapped }
    }
}

impl EventHandler<UsageEventV3> for UsageV3Filter {
    fn accept(&self, event: &UsageEventV3) {
        let mut filtered = event.clone();
        filtered.usage.retain(|usage_type, _| self.include.contains(usage_type));
        if !filtered.usage.is_empty() {
            self.wrapped.accept(&filtered);
        }
    }

    fn is_wrapping(&self, handler: &HandlerRef<UsageEventV3>) -> bool {
        matches_handler(&self.wrapped, handler)
    }
}

/// Options: `version` (2 or 3) and `include`.
pub struct UsageRegistrar;

impl TypeRegistrar for UsageRegistrar {
    fn register(
        &self,
        dispatcher: &Dispatcher,
        event_type: &str,
        subscriber: Arc<dyn Subscriber>,
        options: &Options,
    ) -> Result<(), DispatchError> {
        let include = include_filter(options, event_type, USAGE_TYPES)?;
        match usage_version(options, event_type)? {
            2 => {
                let handler = require_handler::<UsageEvent>(subscriber)?;
                let handler = with_include(include, for_namespace(event_type, handler));
                dispatcher.add_handler(handler);
            }
            _ => {
                let handler = require_handler::<UsageEventV3>(subscriber)?;
                let handler = for_namespace(event_type, handler);
                let handler: HandlerRef<UsageEventV3> = match include {
                    Some(include) => Arc::new(UsageV3Filter::new(include, handler)),
                    None => handler,
                };
                dispatcher.add_handler(handler);
            }
        }
        Ok(())
    }

    fn unregister(&self, dispatcher: &Dispatcher, subscriber: Arc<dyn Subscriber>) {
        if let Some(handler) = UsageEvent::handler_of(subscriber.clone()) {
            dispatcher.remove_handler(&handler);
        }
        if let Some(handler) = UsageEventV3::handler_of(subscriber) {
            dispatcher.remove_handler(&handler);
        }
    }
}

fn usage_version(options: &Options, namespace: &str) -> Result<u32, DispatchError> {
    let version = match options.get("version") {
        None => return Ok(DEFAULT_USAGE_VERSION),
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        Some(_) => None,
    };
    match version {
        Some(2) => Ok(2),
        Some(3) => Ok(3),
        _ => Err(DispatchError::InvalidOption {
            namespace: namespace.to_string(),
            option: "version".to_string(),
            expected: "2 or 3",
        }),
    }
}

/// Derives usage events from every snapshot for the registered handlers.
pub(crate) struct UsageRelay {
    dispatcher: Weak<Dispatcher>,
}

impl UsageRelay {
    pub(crate) fn new(dispatcher: &Arc<Dispatcher>) -> Self {
        Self {
            dispatcher: Arc::downgrade(dispatcher),
        }
    }
}

impl MetricsMessageHandler for UsageRelay {
    fn accept_metrics_msg(&self, msg: &MetricsMessage) {
        if msg.do_not_propagate {
            return;
        }
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return;
        };
        if !dispatcher.usage_handlers.is_empty() {
            for event in usage_events(msg) {
                dispatcher.accept(event);
            }
        }
        if !dispatcher.usage_v3_handlers.is_empty() {
            for event in usage_events_v3(msg) {
                dispatcher.accept(event);
            }
        }
    }
}
