//! Per-service dial statistics.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::handler::HandlerRef;
use crate::kind::Event;
use crate::subscriber::Subscriber;

pub const SERVICE_EVENT_NS: &str = "service";
pub const SERVICE_EVENT_LEGACY_NS: &str = "services";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceEventType {
    #[serde(rename = "service.dial.success")]
    DialSuccess,
    #[serde(rename = "service.dial.fail")]
    DialFail,
    #[serde(rename = "service.dial.timeout")]
    DialTimeout,
    #[serde(rename = "service.dial.error_other")]
    DialErrorOther,
}

impl ServiceEventType {
    pub const ALL: &'static [&'static str] = &[
        "service.dial.success",
        "service.dial.fail",
        "service.dial.timeout",
        "service.dial.error_other",
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DialSuccess => "service.dial.success",
            Self::DialFail => "service.dial.fail",
            Self::DialTimeout => "service.dial.timeout",
            Self::DialErrorOther => "service.dial.error_other",
        }
    }
}

/// Dial outcome counts for one service over one reporting interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub namespace: String,
    pub event_src_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub event_type: ServiceEventType,
    pub service_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub terminator_id: String,
    pub count: u64,
    pub interval_start_utc: i64,
    pub interval_length: u64,
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} serviceId={} terminatorId={} count={} intervalStart={} intervalLength={}",
            self.namespace,
            self.event_type.as_str(),
            self.service_id,
            self.terminator_id,
            self.count,
            self.interval_start_utc,
            self.interval_length
        )
    }
}

impl Event for ServiceEvent {
    const NAMESPACE: &'static str = SERVICE_EVENT_NS;
    const LEGACY_NAMESPACE: Option<&'static str> = Some(SERVICE_EVENT_LEGACY_NS);
    const CAPABILITY: &'static str = "ServiceEventHandler";
    const EVENT_TYPES: &'static [&'static str] = ServiceEventType::ALL;

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
        subscriber.service_handler()
    }
}
