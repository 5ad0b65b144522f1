//! Metrics snapshots and their decomposition into per-metric events.
//!
//! A [`MetricsMessage`] holds every metric of one source for one reporting
//! interval. Subscribers of the `metrics` namespace are fed through a
//! message adapter that converts each snapshot into one [`MetricsEvent`]
//! per metric, applying the subscription's source and metric filters.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use meshd_event::{
    matches_handler, Event, HandlerRef, MetricValue, MetricsEvent, MetricsMessage,
    MetricsMessageHandler, MetricsMessageHandlerRef, Subscriber, METRICS_EVENTS_VERSION,
    METRICS_EVENT_NS,
};
use regex::Regex;
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, TypeRegistrar};
use crate::error::DispatchError;
use crate::kinds::require_handler;
use crate::options::{regex_option, Options};
use crate::topology::Topology;

/// Post-processes every metrics event before delivery.
pub type MetricsMapper = Arc<dyn Fn(&MetricsMessage, &mut MetricsEvent) + Send + Sync>;

/// Splits `ctrl.<name>:<id>` into the metric name and source entity id.
pub fn ctrl_channel_mapper(_msg: &MetricsMessage, event: &mut MetricsEvent) {
    if !event.metric.starts_with("ctrl.") {
        return;
    }
    if let Some((name, id)) = event.metric.split_once(':') {
        let (name, id) = (name.to_string(), id.to_string());
        event.metric = name;
        event.source_entity_id = id;
    }
}

/// Pulls the link id out of `link.<id>.<metric>` names and tags the event
/// with the link's endpoints.
pub struct LinkMetricsMapper {
    topology: Arc<dyn Topology>,
}

impl LinkMetricsMapper {
    pub fn new(topology: Arc<dyn Topology>) -> Self {
        Self { topology }
    }

    pub fn map(&self, event: &mut MetricsEvent) {
        if !event.metric.starts_with("link.") {
            return;
        }
        let suffix_len =
            if event.metric.ends_with("latency") || event.metric.ends_with("queue_time") {
                1
            } else {
                2
            };
        let Some((name, link_id)) = extract_id(&event.metric, "link.", suffix_len) else {
            return;
        };

        if let Some((src, dst)) = self.topology.link_endpoints(&link_id) {
            event.tags.insert("sourceRouterId".to_string(), src);
            event.tags.insert("targetRouterId".to_string(), dst);
        }
        event.metric = name;
        event.source_entity_id = link_id;
    }

    pub fn into_mapper(self) -> MetricsMapper {
        Arc::new(move |_msg: &MetricsMessage, event: &mut MetricsEvent| self.map(event))
    }
}

/// Splits an entity id out of a dotted metric name.
///
/// `name` is `<prefix><id>.<suffix>` where the suffix has `suffix_len`
/// dot-separated parts and the id may itself contain dots. Returns the name
/// with the id removed and the id, or `None` if there are not enough parts.
/// A `suffix_len` of zero leaves no metric name and yields `None`.
pub fn extract_id(name: &str, prefix: &str, suffix_len: usize) -> Option<(String, String)> {
    let rest = name.strip_prefix(prefix).unwrap_or(name);
    let parts: Vec<&str> = rest.split('.').collect();
    if suffix_len == 0 || parts.len() <= suffix_len {
        return None;
    }
    let (id, suffix) = parts.split_at(parts.len() - suffix_len);
    Some((format!("{prefix}{}", suffix.join(".")), id.join(".")))
}

/// Turns snapshots into per-metric events.
pub struct MetricsConverter {
    ctrl_id: String,
    mappers: ArcSwap<Vec<MetricsMapper>>,
}

impl MetricsConverter {
    pub fn new(ctrl_id: &str) -> Self {
        Self {
            ctrl_id: ctrl_id.to_string(),
            mappers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn add_mapper(&self, mapper: MetricsMapper) {
        self.mappers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(mapper.clone());
            next
        });
    }

    /// Emits one event per metric of `msg` into `sink`.
    ///
    /// Nothing is emitted if `source_filter` rejects the source. Each value
    /// is kept only if `metric_filter` matches `<metric>.<key>`; events left
    /// without values are dropped. Every event of one call shares a fresh
    /// `source_event_id`.
    pub fn convert(
        &self,
        msg: &MetricsMessage,
        source_filter: Option<&Regex>,
        metric_filter: Option<&Regex>,
        sink: &mut dyn FnMut(MetricsEvent),
    ) {
        if source_filter.is_some_and(|f| !f.is_match(&msg.source_id)) {
            return;
        }

        let mappers = self.mappers.load_full();
        let builder = EventBuilder {
            converter: self,
            msg,
            mappers: &mappers,
            metric_filter,
            source_event_id: Uuid::new_v4().to_string(),
        };

        for (name, value) in &msg.int_values {
            let mut evt = builder.event("intValue", name);
            builder.put(&mut evt, "", *value);
            finish(evt, sink);
        }

        for (name, value) in &msg.float_values {
            let mut evt = builder.event("floatValue", name);
            builder.put(&mut evt, "", *value);
            finish(evt, sink);
        }

        for (name, m) in &msg.meters {
            let mut evt = builder.event("meter", name);
            builder.put(&mut evt, "count", m.count);
            builder.put(&mut evt, "mean_rate", m.mean_rate);
            builder.put(&mut evt, "m1_rate", m.m1_rate);
            builder.put(&mut evt, "m5_rate", m.m5_rate);
            builder.put(&mut evt, "m15_rate", m.m15_rate);
            finish(evt, sink);
        }

        for (name, h) in &msg.histograms {
            let mut evt = builder.event("histogram", name);
            builder.put(&mut evt, "count", h.count);
            builder.put(&mut evt, "min", h.min);
            builder.put(&mut evt, "max", h.max);
            builder.put(&mut evt, "mean", h.mean);
            builder.put(&mut evt, "std_dev", h.std_dev);
            builder.put(&mut evt, "variance", h.variance);
            builder.put(&mut evt, "p50", h.p50);
            builder.put(&mut evt, "p75", h.p75);
            builder.put(&mut evt, "p95", h.p95);
            builder.put(&mut evt, "p99", h.p99);
            builder.put(&mut evt, "p999", h.p999);
            builder.put(&mut evt, "p9999", h.p9999);
            finish(evt, sink);
        }

        for (name, t) in &msg.timers {
            let mut evt = builder.event("timer", name);
            builder.put(&mut evt, "count", t.count);
            builder.put(&mut evt, "mean_rate", t.mean_rate);
            builder.put(&mut evt, "m1_rate", t.m1_rate);
            builder.put(&mut evt, "m5_rate", t.m5_rate);
            builder.put(&mut evt, "m15_rate", t.m15_rate);
            builder.put(&mut evt, "min", t.min);
            builder.put(&mut evt, "max", t.max);
            builder.put(&mut evt, "mean", t.mean);
            builder.put(&mut evt, "std_dev", t.std_dev);
            builder.put(&mut evt, "variance", t.variance);
            builder.put(&mut evt, "p50", t.p50);
            builder.put(&mut evt, "p75", t.p75);
            builder.put(&mut evt, "p95", t.p95);
            builder.put(&mut evt, "p99", t.p99);
            builder.put(&mut evt, "p999", t.p999);
            builder.put(&mut evt, "p9999", t.p9999);
            finish(evt, sink);
        }
    }
}

struct EventBuilder<'a> {
    converter: &'a MetricsConverter,
    msg: &'a MetricsMessage,
    mappers: &'a [MetricsMapper],
    metric_filter: Option<&'a Regex>,
    source_event_id: String,
}

impl EventBuilder<'_> {
    fn event(&self, metric_type: &str, name: &str) -> MetricsEvent {
        let mut evt = MetricsEvent {
            metric_type: metric_type.to_string(),
            namespace: METRICS_EVENT_NS.to_string(),
            event_src_id: self.converter.ctrl_id.clone(),
            source_id: self.msg.source_id.clone(),
            source_entity_id: String::new(),
            version: METRICS_EVENTS_VERSION,
            timestamp: self.msg.timestamp,
            metric: name.to_string(),
            metrics: BTreeMap::new(),
            tags: self.msg.tags.clone(),
            source_event_id: self.source_event_id.clone(),
        };
        for mapper in self.mappers {
            mapper(self.msg, &mut evt);
        }
        evt
    }

    fn put(&self, evt: &mut MetricsEvent, key: &str, value: impl Into<MetricValue>) {
        let name = format!("{}.{}", evt.metric, key);
        if self.metric_filter.is_some_and(|f| !f.is_match(&name)) {
            return;
        }
        let key = if key.is_empty() { "value" } else { key };
        evt.metrics.insert(key.to_string(), value.into());
    }
}

fn finish(evt: MetricsEvent, sink: &mut dyn FnMut(MetricsEvent)) {
    if !evt.metrics.is_empty() {
        sink(evt);
    }
}

/// Feeds one `metrics` subscriber with filtered events.
pub struct FilteredMetricsAdapter {
    converter: Arc<MetricsConverter>,
    source_filter: Option<Regex>,
    metric_filter: Option<Regex>,
    handler: HandlerRef<MetricsEvent>,
}

impl FilteredMetricsAdapter {
    pub fn new(
        converter: Arc<MetricsConverter>,
        source_filter: Option<Regex>,
        metric_filter: Option<Regex>,
        handler: HandlerRef<MetricsEvent>,
    ) -> Self {
        Self {
            converter,
            source_filter,
            metric_filter,
            handler,
        }
    }
}

impl MetricsMessageHandler for FilteredMetricsAdapter {
    fn accept_metrics_msg(&self, msg: &MetricsMessage) {
        if msg.do_not_propagate {
            return;
        }
        self.converter.convert(
            msg,
            self.source_filter.as_ref(),
            self.metric_filter.as_ref(),
            &mut |evt| self.handler.accept(&evt),
        );
    }

    fn is_wrapping(&self, handler: &HandlerRef<MetricsEvent>) -> bool {
        matches_handler(&self.handler, handler)
    }
}

/// Converts every snapshot, unfiltered, for handlers registered directly
/// with [`Dispatcher::add_handler`].
pub(crate) struct MetricsRelay {
    dispatcher: Weak<Dispatcher>,
}

impl MetricsRelay {
    pub(crate) fn new(dispatcher: &Arc<Dispatcher>) -> Self {
        Self {
            dispatcher: Arc::downgrade(dispatcher),
        }
    }
}

impl MetricsMessageHandler for MetricsRelay {
    fn accept_metrics_msg(&self, msg: &MetricsMessage) {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            return;
        };
        if dispatcher.metrics_handlers.is_empty() {
            return;
        }
        dispatcher
            .metrics_converter
            .convert(msg, None, None, &mut |evt| dispatcher.accept(evt));
    }
}

/// Message handlers, with removal by identity or by wrapped event handler.
pub(crate) struct MessageHandlerRegistry {
    handlers: ArcSwap<Vec<MetricsMessageHandlerRef>>,
}

impl MessageHandlerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            handlers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub(crate) fn add(&self, handler: MetricsMessageHandlerRef) {
        self.handlers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(handler.clone());
            next
        });
    }

    pub(crate) fn remove(&self, handler: &MetricsMessageHandlerRef) {
        self.retain(|candidate| !std::ptr::addr_eq(Arc::as_ptr(candidate), Arc::as_ptr(handler)));
    }

    pub(crate) fn remove_wrapping(&self, handler: &HandlerRef<MetricsEvent>) {
        self.retain(|candidate| !candidate.is_wrapping(handler));
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<MetricsMessageHandlerRef>> {
        self.handlers.load_full()
    }

    fn retain(&self, keep: impl Fn(&MetricsMessageHandlerRef) -> bool) {
        self.handlers.rcu(|current| {
            current
                .iter()
                .filter(|candidate| keep(candidate))
                .cloned()
                .collect::<Vec<_>>()
        });
    }
}

impl Dispatcher {
    pub fn add_metrics_mapper(&self, mapper: MetricsMapper) {
        self.metrics_converter.add_mapper(mapper);
    }

    pub fn add_metrics_message_handler(&self, handler: MetricsMessageHandlerRef) {
        self.metrics_msg_handlers.add(handler);
    }

    pub fn remove_metrics_message_handler(&self, handler: &MetricsMessageHandlerRef) {
        self.metrics_msg_handlers.remove(handler);
    }

    /// Hands a snapshot to every message handler and returns immediately.
    pub fn accept_metrics_msg(&self, msg: MetricsMessage) {
        let handlers = self.metrics_msg_handlers.snapshot();
        if handlers.is_empty() {
            return;
        }
        let msg = Arc::new(msg);
        for handler in handlers.iter().cloned() {
            let msg = msg.clone();
            let task = self
                .runtime
                .spawn_blocking(move || handler.accept_metrics_msg(&msg));
            self.runtime.spawn(async move {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "metrics message handler failed");
                }
            });
        }
    }

    /// Builds a filtering adapter that converts snapshots for `handler`.
    pub fn new_filtered_metrics_adapter(
        &self,
        source_filter: Option<Regex>,
        metric_filter: Option<Regex>,
        handler: HandlerRef<MetricsEvent>,
    ) -> MetricsMessageHandlerRef {
        Arc::new(FilteredMetricsAdapter::new(
            self.metrics_converter.clone(),
            source_filter,
            metric_filter,
            handler,
        ))
    }
}

/// Options: `sourceFilter` and `metricFilter`, both regular expressions.
pub struct MetricsRegistrar;

impl TypeRegistrar for MetricsRegistrar {
    fn register(
        &self,
        dispatcher: &Dispatcher,
        event_type: &str,
        subscriber: Arc<dyn Subscriber>,
        options: &Options,
    ) -> Result<(), DispatchError> {
        let handler = require_handler::<MetricsEvent>(subscriber)?;
        let source_filter = regex_option(options, event_type, "sourceFilter")?;
        let metric_filter = regex_option(options, event_type, "metricFilter")?;
        dispatcher.add_metrics_message_handler(dispatcher.new_filtered_metrics_adapter(
            source_filter,
            metric_filter,
            handler,
        ));
        Ok(())
    }

    fn unregister(&self, dispatcher: &Dispatcher, subscriber: Arc<dyn Subscriber>) {
        if let Some(handler) = MetricsEvent::handler_of(subscriber) {
            dispatcher.remove_handler(&handler);
        }
    }
}
