//! Metrics snapshots and the flat events derived from them.
//!
//! Routers and controllers report a [`MetricsMessage`] per reporting
//! interval: one snapshot holding every registered gauge, meter, histogram
//! and timer of the source. Consumers that want one record per metric
//! subscribe to [`MetricsEvent`]s instead, which the dispatcher derives from
//! each snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const METRICS_EVENT_NS: &str = "metrics";
pub const METRICS_EVENTS_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub count: i64,
    pub mean_rate: f64,
    pub m1_rate: f64,
    pub m5_rate: f64,
    pub m15_rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: i64,
    pub min: i64,
    pub max: i64,
    pub mean: f64,
    pub std_dev: f64,
    pub variance: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub p9999: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub count: i64,
    pub mean_rate: f64,
    pub m1_rate: f64,
    pub m5_rate: f64,
    pub m15_rate: f64,
    pub min: i64,
    pub max: i64,
    pub mean: f64,
    pub std_dev: f64,
    pub variance: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub p9999: f64,
}

/// Values of one interval counter, bucketed by interval start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalCounter {
    /// Seconds.
    pub interval_length: u64,
    #[serde(default)]
    pub buckets: Vec<IntervalBucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalBucket {
    /// Unix seconds.
    pub interval_start_utc: i64,
    /// Keyed by circuit id.
    #[serde(default)]
    pub values: BTreeMap<String, u64>,
}

/// Usage of every circuit seen during one interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub interval_start_utc: i64,
    pub interval_length: u64,
    /// Keyed by circuit id.
    #[serde(default)]
    pub buckets: BTreeMap<String, UsageBucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageBucket {
    /// Byte counts keyed by usage type, such as `ingress.rx`.
    #[serde(default)]
    pub values: BTreeMap<String, u64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// One reporting interval's worth of metrics from a single source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsMessage {
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub int_values: BTreeMap<String, i64>,
    #[serde(default)]
    pub float_values: BTreeMap<String, f64>,
    #[serde(default)]
    pub meters: BTreeMap<String, MeterSnapshot>,
    #[serde(default)]
    pub histograms: BTreeMap<String, HistogramSnapshot>,
    #[serde(default)]
    pub timers: BTreeMap<String, TimerSnapshot>,
    /// Per-circuit byte counters keyed by counter name, such as
    /// `usage.ingress.tx`.
    #[serde(default)]
    pub interval_counters: BTreeMap<String, IntervalCounter>,
    /// Per-circuit usage grouped by interval, reported by newer routers.
    #[serde(default)]
    pub usage_counters: Vec<UsageCounter>,
    /// Set on snapshots relayed from another controller, which has already
    /// turned them into events.
    #[serde(default)]
    pub do_not_propagate: bool,
}

/// A single value inside a [`MetricsEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// One metric of one snapshot, with its statistics flattened into a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsEvent {
    /// `intValue`, `floatValue`, `meter`, `histogram` or `timer`.
    pub metric_type: String,
    pub namespace: String,
    pub event_src_id: String,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_entity_id: String,
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Shared by every event derived from the same snapshot.
    pub source_event_id: String,
}

impl fmt::Display for MetricsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} source={} values={}",
            self.namespace,
            self.metric_type,
            self.metric,
            self.source_id,
            self.metrics.len()
        )
    }
}

impl Event for MetricsEvent {
    const NAMESPACE: &'static str = METRICS_EVENT_NS;
    const CAPABILITY: &'static str = "MetricsEventHandler";

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: &str) {
        self.namespace = namespace.to_string();
    }

    fn handler_of(subscriber: Arc<dyn Subscriber>) -> Option<HandlerRef<Self>> {
        subscriber.metrics_handler()
    }
}

/// Receives raw snapshots.
pub trait MetricsMessageHandler: Send + Sync {
    fn accept_metrics_msg(&self, msg: &MetricsMessage);

    /// Returns `true` if this message handler feeds `handler` derived
    /// events, so that unregistering `handler` also removes it.
    fn is_wrapping(&self, _handler: &HandlerRef<MetricsEvent>) -> bool {
        false
    }
}

pub type MetricsMessageHandlerRef = Arc<dyn MetricsMessageHandler>;

/// Adapts a closure into a [`MetricsMessageHandler`].
pub struct MetricsMessageHandlerFn<F> {
    f: F,
}

impl<F> MetricsMessageHandlerFn<F>
where
    F: Fn(&MetricsMessage) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> MetricsMessageHandler for MetricsMessageHandlerFn<F>
where
    F: Fn(&MetricsMessage) + Send + Sync,
{
    fn accept_metrics_msg(&self, msg: &MetricsMessage) {
        (self.f)(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_values_serialize_as_plain_numbers() {
        let mut metrics = BTreeMap::new();
        metrics.insert("count".to_string(), MetricValue::Int(3));
        metrics.insert("mean".to_string(), MetricValue::Float(1.5));
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["mean"], 1.5);
    }
}
